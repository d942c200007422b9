use thiserror::Error;

use crate::ports::documents::StoreError;
use crate::ports::media::MediaError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("stored document is unreadable: {0}")]
    Decode(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => DomainError::NotFound(what),
            StoreError::AlreadyExists(what) => DomainError::Conflict(format!("{what} already exists")),
            StoreError::Conflict => {
                DomainError::Unavailable("concurrent write conflict on document store".into())
            }
            StoreError::Unavailable(message) => DomainError::Unavailable(message),
            StoreError::Operation(message) => DomainError::Upstream(message),
        }
    }
}

impl From<MediaError> for DomainError {
    fn from(err: MediaError) -> Self {
        DomainError::Upstream(err.to_string())
    }
}
