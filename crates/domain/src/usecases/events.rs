//! Events serialized onto a controller's queue, and the updates it reports

use crate::error::EngineError;
use crate::model::{AssetDescriptor, Post, ReplySnapshot};
use crate::ports::{RemoteError, UploadError};
use crate::usecases::upload::AttemptId;
use crate::usecases::votes::{MutationKey, RemoteAck};

/// Which of the two feed streams ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStream {
    Replies,
    Post,
}

/// Asynchronous notifications, applied one at a time in arrival order
#[derive(Debug)]
pub enum DiscussionEvent {
    Replies {
        subscription: u64,
        snapshot: ReplySnapshot,
    },
    Post {
        subscription: u64,
        post: Post,
    },
    FeedEnded {
        subscription: u64,
        stream: FeedStream,
    },
    MutationSettled {
        ticket: u64,
        key: MutationKey,
        result: Result<RemoteAck, RemoteError>,
    },
    UploadStarted {
        attempt: AttemptId,
    },
    UploadProgress {
        attempt: AttemptId,
        percent: u8,
    },
    UploadFinished {
        attempt: AttemptId,
        result: Result<AssetDescriptor, UploadError>,
    },
}

/// What changed after handling one event
#[derive(Debug, Clone, PartialEq)]
pub enum DiscussionUpdate {
    /// A newer reply snapshot replaced the tree
    RepliesReplaced { version: u64, count: usize },
    /// An older or duplicate snapshot was discarded
    SnapshotSuperseded { version: u64 },
    PostReplaced,
    FeedEnded(FeedStream),
    MutationConfirmed(MutationKey),
    /// A coalesced follow-up was sent after the previous call succeeded
    MutationFollowUp(MutationKey),
    MutationRolledBack { key: MutationKey, error: EngineError },
    /// The target vanished or the server no longer knows it; reverted quietly
    MutationDropped(MutationKey),
    UploadStarted,
    UploadProgress(u8),
    UploadAttached(AssetDescriptor),
    UploadFailed(UploadError),
    /// Event from a torn-down subscription or superseded attempt
    Ignored,
}
