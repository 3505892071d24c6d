//! Resource layer error types

use crate::remote::RemoteError;
use thiserror::Error;

/// Errors surfaced by the resource manager and the page caches
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// The remote collaborator failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Description resolution failed earlier; not retried
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// No collection exists for the resource
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// A payload could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::Serialization(err.to_string())
    }
}

pub type ResourceResult<T> = Result<T, ResourceError>;
