//! Beneficiary allocation engine.
//!
//! # Responsibility
//! - Compute equal splits and keep session state in step with the link store.
//! - Gate manual overrides and validate totals before dependent actions.
//!
//! # Invariants
//! - Automatic recompute runs only when a container's beneficiary set changes.
//! - Store failures never leave the engine in a panicking or poisoned state;
//!   they are returned to the triggering caller.

pub mod coordinator;
pub mod equal_split;
pub mod error;
pub mod override_gate;
pub mod session;
pub mod state;
pub mod validator;
