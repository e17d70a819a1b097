//! Container identity (assets and insurance policies).
//!
//! # Responsibility
//! - Identify one allocation set independently of what the container is.
//!
//! # Invariants
//! - Asset and policy ids live in separate key spaces: an asset and a policy
//!   with the same uuid are different containers.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// What kind of estate item carries the allocation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Property, vehicle, account, investment or any other owned asset.
    Asset,
    /// Insurance policy.
    Policy,
}

impl ContainerKind {
    /// Stable lowercase label used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Policy => "policy",
        }
    }

    /// Parses the storage label produced by [`ContainerKind::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asset" => Some(Self::Asset),
            "policy" => Some(Self::Policy),
            _ => None,
        }
    }
}

/// Identifier of one container's allocation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    pub kind: ContainerKind,
    pub uuid: Uuid,
}

impl ContainerId {
    pub fn new(kind: ContainerKind, uuid: Uuid) -> Self {
        Self { kind, uuid }
    }

    pub fn asset(uuid: Uuid) -> Self {
        Self::new(ContainerKind::Asset, uuid)
    }

    pub fn policy(uuid: Uuid) -> Self {
        Self::new(ContainerKind::Policy, uuid)
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.uuid)
    }
}
