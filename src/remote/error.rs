//! Remote collaborator error types

use thiserror::Error;

/// Errors returned by a `Remote`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The server does not know the resource
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The server could not be reached
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The server refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
