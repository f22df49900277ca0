// ABOUTME: Unified error type for the container provisioning engine
// ABOUTME: Every failure surface maps to a ContainerError variant, including rollback aggregates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Path escapes container subtree: {0}")]
    InvalidPath(String),

    #[error("Resource already exists: {0}")]
    ResourceExists(String),

    #[error("Resource missing: {0}")]
    ResourceMissing(String),

    #[error("Container host unavailable: {0}")]
    HostUnavailable(String),

    #[error("Quota error: {0}")]
    Quota(String),

    #[error("Port allocation error: {0}")]
    PortAllocation(String),

    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{trigger}; {} compensating step(s) also failed", undo_errors.len())]
    Aggregate {
        trigger: Box<ContainerError>,
        undo_errors: Vec<ContainerError>,
    },
}

impl ContainerError {
    /// The error that started a rollback, unwrapping an aggregate if needed.
    pub fn trigger(&self) -> &ContainerError {
        match self {
            ContainerError::Aggregate { trigger, .. } => trigger,
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
