//! Storage types

use serde::{Deserialize, Serialize};

/// Identifier of a resolved blob container (the bucket name for S3)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of an idempotent ensure-container call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    /// This call created the container
    Created(ContainerId),
    /// The container was already there, or another caller won the creation race
    AlreadyExists(ContainerId),
}

impl ContainerStatus {
    pub fn into_container_id(self) -> ContainerId {
        match self {
            ContainerStatus::Created(id) | ContainerStatus::AlreadyExists(id) => id,
        }
    }
}
