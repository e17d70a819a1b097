//! Persistence contracts for allocation links.
//!
//! # Responsibility
//! - Define the link store contract consumed by the allocation engine.
//! - Keep SQL details out of redistribution logic.
//!
//! # Invariants
//! - Store APIs return semantic errors (`LinkNotFound`, `DuplicateLink`) in
//!   addition to transport errors.

pub mod link_repo;
