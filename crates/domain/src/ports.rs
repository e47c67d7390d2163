//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the discussion engine and the
//! systems it talks to. Adapters implement them against real infrastructure.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{
    AssetDescriptor, BookmarkOutcome, InteractionState, LikeOutcome, LocalFile, NewReply, Post,
    PostId, ReactionRequest, ReplyId, ReplySnapshot, SolutionRequest, UserId, VoteRequest,
};

/// Push-based stream of full snapshots
pub type SnapshotStream<T> = BoxStream<'static, T>;

/// Error type for feed subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Port for live subscriptions to one discussion thread.
///
/// Every item is a complete snapshot, never a delta. The two subscriptions are
/// independent: a post change never re-delivers replies and vice versa.
#[async_trait]
pub trait DiscussionFeed: Send + Sync {
    async fn subscribe_replies(
        &self,
        post_id: &PostId,
    ) -> Result<SnapshotStream<ReplySnapshot>, FeedError>;

    async fn subscribe_post(&self, post_id: &PostId) -> Result<SnapshotStream<Post>, FeedError>;
}

/// Error type for remote mutations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Server error: {0}")]
    Server(String),
}

/// Port for the mutation surface of the discussion backend.
///
/// The caller identity is carried by the session behind the implementation.
#[async_trait]
pub trait DiscussionApi: Send + Sync {
    async fn submit_reply(&self, reply: &NewReply) -> Result<ReplyId, RemoteError>;

    async fn cast_vote(&self, request: &VoteRequest) -> Result<(), RemoteError>;

    async fn cast_reaction(&self, request: &ReactionRequest) -> Result<(), RemoteError>;

    async fn set_solution(&self, request: &SolutionRequest) -> Result<(), RemoteError>;

    async fn toggle_like(&self, post_id: &PostId) -> Result<LikeOutcome, RemoteError>;

    async fn toggle_bookmark(&self, post_id: &PostId) -> Result<BookmarkOutcome, RemoteError>;

    async fn delete_reply(&self, post_id: &PostId, reply_id: &ReplyId) -> Result<(), RemoteError>;
}

/// Error type for asset uploads, typed by cause
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("Upload aborted")]
    Aborted,
    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),
    #[error("Network error during upload: {0}")]
    Network(String),
    #[error("Upload server error: {0}")]
    Server(String),
}

/// Progress sink handed to an uploader.
///
/// Values are clamped to 0-100 and only forwarded when they increase.
pub struct UploadProgress {
    sink: Box<dyn Fn(u8) + Send + Sync>,
    last: AtomicU8,
}

impl UploadProgress {
    pub fn new(sink: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            last: AtomicU8::new(0),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::Relaxed);
        if percent > previous {
            (self.sink)(percent);
        }
    }

    /// Report `done` out of `total` bytes
    pub fn report_bytes(&self, done: u64, total: u64) {
        if total == 0 {
            self.report(100);
            return;
        }
        let percent = (done.min(total) * 100 / total) as u8;
        self.report(percent);
    }

    pub fn last(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }
}

/// Port for the external file-hosting service
#[async_trait]
pub trait AssetUploader: Send + Sync {
    /// Upload a file, reporting progress; `UploadError::Aborted` marks cancellation
    async fn upload_asset(
        &self,
        file: &LocalFile,
        progress: &UploadProgress,
    ) -> Result<AssetDescriptor, UploadError>;
}

/// Error type for interaction ledger persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for persisting a user's interaction ledger across reloads
#[async_trait]
pub trait InteractionRepo: Send + Sync {
    /// Load the ledger for a user, empty when nothing was saved
    async fn load(&self, user_id: &UserId) -> Result<InteractionState, StoreError>;

    /// Replace the saved ledger for a user
    async fn save(&self, user_id: &UserId, state: &InteractionState) -> Result<(), StoreError>;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
