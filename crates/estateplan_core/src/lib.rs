//! Beneficiary allocation engine for the estate planning app.
//! Owns the share arithmetic, session state and link persistence rules.

pub mod allocation;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use allocation::coordinator::{RedistributionCoordinator, RedistributionReport};
pub use allocation::equal_split::equal_split;
pub use allocation::error::{AllocationError, AllocationResult};
pub use allocation::override_gate::ManualOverrideGate;
pub use allocation::session::AllocationSession;
pub use allocation::state::{AllocationEntry, AllocationState, RecomputeOutcome};
pub use allocation::validator::{AllocationValidator, ValidationError};
pub use config::{AllocationConfig, CommitTiming, ConfigError, RemovalPolicy, WriteMode};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::allocation::{AllocationLink, AllocationType, LinkId, Percentage};
pub use model::beneficiary::{BeneficiaryId, BeneficiaryKey, DraftId};
pub use model::container::{ContainerId, ContainerKind};
pub use repo::link_repo::{LinkStore, LinkWrite, SqliteLinkStore, StoreError, StoreResult};

/// Health check used by host bindings.
pub fn ping() -> &'static str {
    "pong"
}

pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
