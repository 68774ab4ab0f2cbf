use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by gallery and triage operations. Nothing retries
/// internally; the caller decides whether a retry makes sense
#[derive(Debug, Error)]
pub enum Error {
    /// Declared media type does not belong to the expected family
    #[error("Invalid media type: expected {expected}, got {declared:?}")]
    InvalidMediaType {
        expected: &'static str,
        declared: String,
    },

    /// The image payload could not be decoded or re-encoded
    #[error("Image decode failed: {0}")]
    Decode(String),

    /// A single object store write failed; nothing was created
    #[error("Storage write failed for {path}: {reason}")]
    StorageWriteFailure { path: String, reason: String },

    /// Reading an already stored blob failed
    #[error("Storage read failed for {path}: {reason}")]
    StorageReadFailure { path: String, reason: String },

    /// One rendition of a dual write landed and the other did not; the asset
    /// must be treated as not created
    #[error("Partial upload for asset {id}: {written} was written but {failed} failed: {reason}")]
    PartialUploadFailure {
        id: Uuid,
        written: String,
        failed: String,
        reason: String,
    },

    /// Referenced asset or request does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// Caller-supplied values are out of range
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Metadata store failure
    #[error("Metadata store error: {0}")]
    Metadata(#[from] sqlx::Error),

    /// A blocking task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn asset_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "asset",
            id,
        }
    }

    pub fn request_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "request",
            id,
        }
    }

    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMediaType { .. } => "INVALID_MEDIA_TYPE",
            Self::Decode(_) => "DECODE_ERROR",
            Self::StorageWriteFailure { .. } => "STORAGE_WRITE_FAILURE",
            Self::StorageReadFailure { .. } => "STORAGE_READ_FAILURE",
            Self::PartialUploadFailure { .. } => "PARTIAL_UPLOAD_FAILURE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Metadata(_) => "METADATA_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
