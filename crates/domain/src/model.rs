//! Domain models and value objects

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use time::OffsetDateTime;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_newtype!(
    /// Identifier of a discussion post
    PostId
);
string_newtype!(
    /// Identifier of a reply within a post
    ReplyId
);
string_newtype!(
    /// Identifier of a user account
    UserId
);
string_newtype!(
    /// Identifier of an uploaded media asset
    AssetId
);
string_newtype!(
    /// Emoji reaction kind (open set, e.g. "thumbs_up", "heart")
    ReactionKind
);

/// The two directions of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Up,
    Down,
}

impl VoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Up => "up",
            VoteKind::Down => "down",
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an uploaded media asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    /// Classify a MIME content type, `None` when unsupported
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let major = content_type.split('/').next()?.trim().to_ascii_lowercase();
        match major.as_str() {
            "image" => Some(AssetKind::Image),
            "video" => Some(AssetKind::Video),
            _ => None,
        }
    }
}

/// Immutable result of a successful upload, the only thing attachable to a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub id: AssetId,
    pub kind: AssetKind,
    pub byte_size: u64,
    /// Public reference to the hosted asset
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// A file chosen locally for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn kind(&self) -> Option<AssetKind> {
        AssetKind::from_content_type(&self.content_type)
    }
}

/// A discussion post as delivered by the post subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub author_name: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub like_count: u32,
    /// Users who liked the post, in the order they liked it
    #[serde(default)]
    pub liked_by: Vec<UserId>,
    /// Denormalized number of replies
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
    /// Replies marked as solutions, in marking order
    #[serde(default)]
    pub solution_reply_ids: Vec<ReplyId>,
    #[serde(default)]
    pub media: Vec<AssetDescriptor>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Post {
    /// Derived from the solution list; there is no stored flag to drift
    pub fn resolved(&self) -> bool {
        !self.solution_reply_ids.is_empty()
    }

    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.liked_by.contains(user)
    }

    pub fn is_author(&self, user: &UserId) -> bool {
        &self.author_id == user
    }
}

/// A reply record as delivered by the reply subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub post_id: PostId,
    /// `None` for root-level replies
    #[serde(default)]
    pub parent_reply_id: Option<ReplyId>,
    pub author_id: UserId,
    pub author_name: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub upvotes: u32,
    #[serde(default)]
    pub upvoted_by: BTreeSet<UserId>,
    #[serde(default)]
    pub downvotes: u32,
    #[serde(default)]
    pub downvoted_by: BTreeSet<UserId>,
    #[serde(default)]
    pub reactions: BTreeMap<ReactionKind, BTreeSet<UserId>>,
    #[serde(default)]
    pub is_solution: bool,
    #[serde(default)]
    pub media: Vec<AssetDescriptor>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
}

impl Reply {
    /// Vote currently recorded for a user in the authoritative sets
    pub fn vote_of(&self, user: &UserId) -> Option<VoteKind> {
        if self.upvoted_by.contains(user) {
            Some(VoteKind::Up)
        } else if self.downvoted_by.contains(user) {
            Some(VoteKind::Down)
        } else {
            None
        }
    }

    /// First reaction kind (in kind order) held by a user
    pub fn reaction_of(&self, user: &UserId) -> Option<&ReactionKind> {
        self.reactions
            .iter()
            .find(|(_, users)| users.contains(user))
            .map(|(kind, _)| kind)
    }

    pub fn reaction_count(&self, kind: &ReactionKind) -> usize {
        self.reactions.get(kind).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn score(&self) -> i64 {
        i64::from(self.upvotes) - i64::from(self.downvotes)
    }
}

/// Complete, ordered set of replies for one post at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySnapshot {
    pub post_id: PostId,
    /// Strictly increasing per subscription
    pub version: u64,
    pub replies: Vec<Reply>,
}

/// The person operating this session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Viewer {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            is_admin: false,
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// Payload of a reply submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReply {
    pub post_id: PostId,
    #[serde(default)]
    pub parent_reply_id: Option<ReplyId>,
    pub body: String,
    #[serde(default)]
    pub media: Vec<AssetDescriptor>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
}

/// Remote vote mutation, carrying both sides of the transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub post_id: PostId,
    pub reply_id: ReplyId,
    /// The button the user pressed
    pub kind: VoteKind,
    pub from: Option<VoteKind>,
    pub to: Option<VoteKind>,
}

/// Remote reaction mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub post_id: PostId,
    pub reply_id: ReplyId,
    pub new_kind: Option<ReactionKind>,
    pub old_kind: Option<ReactionKind>,
}

/// Remote solution mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionRequest {
    pub post_id: PostId,
    pub reply_id: ReplyId,
    pub desired: bool,
    pub caller_id: UserId,
}

/// Server response to a like toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeOutcome {
    pub liked: bool,
    #[serde(default)]
    pub message: String,
}

/// Server response to a bookmark toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkOutcome {
    pub bookmarked: bool,
    #[serde(default)]
    pub message: String,
}

/// The session's own choices, kept apart from authoritative aggregates.
///
/// A key present with `None` means "known: no vote/reaction"; an absent key
/// means the entry has not been seeded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionState {
    #[serde(default)]
    pub votes: BTreeMap<ReplyId, Option<VoteKind>>,
    #[serde(default)]
    pub reactions: BTreeMap<ReplyId, Option<ReactionKind>>,
    #[serde(default)]
    pub bookmarks: BTreeSet<PostId>,
    #[serde(default)]
    pub likes: BTreeMap<PostId, bool>,
}
