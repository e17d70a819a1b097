//! Domain model for beneficiary allocation.
//!
//! # Responsibility
//! - Define identifiers for containers (assets/policies) and beneficiaries.
//! - Define the exact percentage type shared by every allocation component.
//!
//! # Invariants
//! - Draft and persisted beneficiaries never share a key space.
//! - Percentages are held as integer basis points in `0..=10_000`.

pub mod allocation;
pub mod beneficiary;
pub mod container;
