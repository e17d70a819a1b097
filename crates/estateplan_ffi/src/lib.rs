//! FFI entry crate for the Flutter host.

pub mod api;
