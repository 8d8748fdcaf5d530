//! Error types for orchestration runs

use crate::catalog::ResourceType;
use thiserror::Error;

/// Errors surfaced by the orchestration layer.
///
/// Everything here is fatal to the call that returns it. Failures of a single
/// lifecycle operation never show up as a `CloudError`; they are recorded as
/// a failed [`OperationOutcome`](crate::outcome::OperationOutcome) instead.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Unknown resource type '{dependency}' referenced by '{dependent}'")]
    UnknownDependency {
        dependent: ResourceType,
        dependency: ResourceType,
    },

    #[error("Resource type declared twice: {0}")]
    DuplicateType(ResourceType),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("No provider registered for resource type: {0}")]
    ProviderNotFound(ResourceType),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(ResourceType),

    #[error("Instance key declared twice: {0}")]
    DuplicateKey(String),

    #[error("Instance '{key}' references unknown instance '{dependency}'")]
    UnknownReference { key: String, dependency: String },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid property path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CloudError {
    /// Whether this error belongs to the configuration class, i.e. it was
    /// detected before any provider call was issued.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CloudError::UnknownDependency { .. }
                | CloudError::DuplicateType(_)
                | CloudError::CircularDependency(_)
                | CloudError::ProviderNotFound(_)
                | CloudError::UnknownResourceType(_)
                | CloudError::DuplicateKey(_)
                | CloudError::UnknownReference { .. }
                | CloudError::Template(_)
                | CloudError::InvalidPath { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
