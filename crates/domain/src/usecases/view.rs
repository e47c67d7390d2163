//! Derived discussion state handed to the presentation layer

use crate::model::Post;
use crate::usecases::tree::ReplyForest;

/// The post and reply forest as currently rendered, optimistic changes included
#[derive(Debug, Clone, Default)]
pub struct DiscussionView {
    pub post: Option<Post>,
    pub forest: ReplyForest,
}

/// Which subscription a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotDomain {
    Replies,
    Post,
}
