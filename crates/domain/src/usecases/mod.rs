//! Discussion engines and the controller composing them

pub mod controller;
pub mod events;
pub mod feed;
pub mod interactions;
pub mod solution;
pub mod tree;
pub mod upload;
pub mod view;
pub mod votes;

pub use controller::{DiscussionController, FeedStatus};
pub use events::{DiscussionEvent, DiscussionUpdate, FeedStream};
pub use feed::{FeedSubscription, LiveFeedSubscriber};
pub use interactions::InteractionStateStore;
pub use solution::{SolutionAuthorizer, SolutionChange, SolutionPropagator, author_or_admin};
pub use tree::{NodeIx, ProcessedReply, ReplyForest, ThreadEntry};
pub use upload::{AttemptId, PreviewRef, UploadPipeline, UploadState};
pub use view::{DiscussionView, SnapshotDomain};
pub use votes::{MutationKey, Settlement, VoteReactionEngine, next_reaction, next_vote};
