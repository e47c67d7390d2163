//! Error taxonomy surfaced by the discussion engines

use thiserror::Error;

use crate::model::{AssetKind, ReplyId};
use crate::ports::{FeedError, RemoteError, UploadError};

/// Input rejected before any network call is made
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Reply body is empty")]
    EmptyBody,
    #[error("Reply body too long: {len} > {max} characters")]
    BodyTooLong { len: usize, max: usize },
    #[error("Too many mentions: {count} > {max}")]
    TooManyMentions { count: usize, max: usize },
    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),
    #[error("Media kind not allowed: {0:?}")]
    MediaKindNotAllowed(AssetKind),
    #[error("Media too large: {size} > {max} bytes")]
    MediaTooLarge { size: u64, max: u64 },
    #[error("An upload is still in progress")]
    UploadInProgress,
    #[error("The attachment failed to upload and must be cleared first")]
    AttachmentFailed,
    #[error("Reply {0} is not part of the current thread")]
    UnknownParent(ReplyId),
    #[error("Rejected by server: {0}")]
    Rejected(String),
}

/// Errors returned by the engines and the controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Network error: {0}")]
    TransientNetwork(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl EngineError {
    /// Whether retrying the same action could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientNetwork(_))
    }
}

impl From<RemoteError> for EngineError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Network(msg) => EngineError::TransientNetwork(msg),
            RemoteError::Server(msg) => EngineError::TransientNetwork(msg),
            RemoteError::Unauthorized(msg) => EngineError::Authorization(msg),
            RemoteError::NotFound(msg) => EngineError::NotFound(msg),
            RemoteError::Rejected(msg) => EngineError::Validation(ValidationError::Rejected(msg)),
        }
    }
}

impl From<FeedError> for EngineError {
    fn from(error: FeedError) -> Self {
        match error {
            FeedError::Connect(msg) => EngineError::TransientNetwork(msg),
            FeedError::Auth(msg) => EngineError::Authorization(msg),
            FeedError::NotFound(msg) => EngineError::NotFound(msg),
        }
    }
}
