use crate::payload::CodecError;
use crate::reference::Reference;
use crate::store::StoreError;

/// Error type for resolution, pagination, append and migration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reference not found: {0}")]
    NotFound(String),
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    #[error("duplicate reference: {0}")]
    DuplicateReference(Reference),
    #[error("external store unavailable: {0}")]
    ExternalStoreUnavailable(String),
    #[error("migration gap in conversation {conversation_id} at {identifier}: {reason}")]
    MigrationGap {
        conversation_id: String,
        identifier: String,
        reason: String,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("store error: {0}")]
    Store(StoreError),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ExternalStoreUnavailable(_) | Error::Store(StoreError::Backend(_))
        )
    }

    /// Whether the handle or reference does not resolve.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::InvalidHandle(_))
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateReference(reference) => Error::DuplicateReference(reference),
            other => Error::Store(other),
        }
    }
}
