//! Interaction state store - the session's own votes, reactions, likes and bookmarks
//!
//! Authoritative sets on replies and posts hold every user's choices. This
//! ledger holds only the current session's, is seeded once per item from
//! those sets and is maintained independently afterwards.

use crate::model::{InteractionState, Post, PostId, ReactionKind, ReplyId, UserId, VoteKind};
use crate::usecases::tree::ReplyForest;

/// Per-session ledger of the user's own choices
#[derive(Debug, Clone)]
pub struct InteractionStateStore {
    user_id: UserId,
    state: InteractionState,
    dirty: bool,
}

impl InteractionStateStore {
    pub fn new(user_id: UserId) -> Self {
        Self::with_state(user_id, InteractionState::default())
    }

    /// Resume from a previously persisted ledger
    pub fn with_state(user_id: UserId, state: InteractionState) -> Self {
        Self {
            user_id,
            state,
            dirty: false,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn vote(&self, reply_id: &ReplyId) -> Option<VoteKind> {
        self.state.votes.get(reply_id).copied().flatten()
    }

    pub fn reaction(&self, reply_id: &ReplyId) -> Option<&ReactionKind> {
        self.state.reactions.get(reply_id).and_then(Option::as_ref)
    }

    pub fn is_liked(&self, post_id: &PostId) -> bool {
        self.state.likes.get(post_id).copied().unwrap_or(false)
    }

    pub fn is_bookmarked(&self, post_id: &PostId) -> bool {
        self.state.bookmarks.contains(post_id)
    }

    pub fn set_vote(&mut self, reply_id: &ReplyId, vote: Option<VoteKind>) {
        self.state.votes.insert(reply_id.clone(), vote);
        self.dirty = true;
    }

    pub fn set_reaction(&mut self, reply_id: &ReplyId, reaction: Option<ReactionKind>) {
        self.state.reactions.insert(reply_id.clone(), reaction);
        self.dirty = true;
    }

    pub fn set_liked(&mut self, post_id: &PostId, liked: bool) {
        self.state.likes.insert(post_id.clone(), liked);
        self.dirty = true;
    }

    pub fn set_bookmarked(&mut self, post_id: &PostId, bookmarked: bool) {
        let changed = if bookmarked {
            self.state.bookmarks.insert(post_id.clone())
        } else {
            self.state.bookmarks.remove(post_id)
        };
        self.dirty |= changed;
    }

    /// Seed entries for replies never seen before; returns how many were seeded
    pub fn seed_from_replies(&mut self, forest: &ReplyForest) -> usize {
        let mut seeded = 0;
        for node in forest.walk() {
            let reply = &node.reply;
            if !self.state.votes.contains_key(&reply.id) {
                self.state
                    .votes
                    .insert(reply.id.clone(), reply.vote_of(&self.user_id));
                seeded += 1;
            }
            if !self.state.reactions.contains_key(&reply.id) {
                self.state
                    .reactions
                    .insert(reply.id.clone(), reply.reaction_of(&self.user_id).cloned());
            }
        }
        if seeded > 0 {
            self.dirty = true;
            tracing::debug!(user_id = %self.user_id, seeded, "Seeded interaction ledger from replies");
        }
        seeded
    }

    /// Seed the like entry for a post never seen before
    pub fn seed_from_post(&mut self, post: &Post) -> bool {
        if self.state.likes.contains_key(&post.id) {
            return false;
        }
        self.state
            .likes
            .insert(post.id.clone(), post.is_liked_by(&self.user_id));
        self.dirty = true;
        true
    }

    /// Whether the ledger changed since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reply;
    use time::OffsetDateTime;

    fn reply_with_votes(id: &str, up: &[&str], down: &[&str]) -> Reply {
        Reply {
            id: ReplyId::from(id),
            post_id: PostId::from("post"),
            parent_reply_id: None,
            author_id: UserId::from("author"),
            author_name: "Author".to_string(),
            body: "body".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            upvotes: up.len() as u32,
            upvoted_by: up.iter().map(|u| UserId::from(*u)).collect(),
            downvotes: down.len() as u32,
            downvoted_by: down.iter().map(|u| UserId::from(*u)).collect(),
            reactions: Default::default(),
            is_solution: false,
            media: vec![],
            mentions: vec![],
        }
    }

    #[test]
    fn test_seed_uses_membership_of_current_user_only() {
        let forest = ReplyForest::build(vec![
            reply_with_votes("r1", &["me", "other"], &[]),
            reply_with_votes("r2", &["other"], &["someone"]),
            reply_with_votes("r3", &[], &["me"]),
        ]);
        let mut store = InteractionStateStore::new(UserId::from("me"));

        assert_eq!(store.seed_from_replies(&forest), 3);

        assert_eq!(store.vote(&ReplyId::from("r1")), Some(VoteKind::Up));
        assert_eq!(store.vote(&ReplyId::from("r2")), None);
        assert_eq!(store.vote(&ReplyId::from("r3")), Some(VoteKind::Down));
    }

    #[test]
    fn test_seed_happens_once_per_reply() {
        let mut store = InteractionStateStore::new(UserId::from("me"));
        let first = ReplyForest::build(vec![reply_with_votes("r1", &[], &[])]);
        store.seed_from_replies(&first);
        store.set_vote(&ReplyId::from("r1"), Some(VoteKind::Up));

        // The server has not caught up yet; the ledger must not be overwritten
        let second = ReplyForest::build(vec![reply_with_votes("r1", &[], &[])]);
        assert_eq!(store.seed_from_replies(&second), 0);
        assert_eq!(store.vote(&ReplyId::from("r1")), Some(VoteKind::Up));
    }

    #[test]
    fn test_persisted_state_wins_over_seeding() {
        let mut persisted = InteractionState::default();
        persisted.votes.insert(ReplyId::from("r1"), None);
        let mut store = InteractionStateStore::with_state(UserId::from("me"), persisted);

        let forest = ReplyForest::build(vec![reply_with_votes("r1", &["me"], &[])]);
        store.seed_from_replies(&forest);

        assert_eq!(store.vote(&ReplyId::from("r1")), None);
    }

    #[test]
    fn test_bookmark_and_like_flags() {
        let mut store = InteractionStateStore::new(UserId::from("me"));
        let post_id = PostId::from("p1");

        assert!(!store.is_bookmarked(&post_id));
        store.set_bookmarked(&post_id, true);
        assert!(store.is_bookmarked(&post_id));
        assert!(store.take_dirty());
        assert!(!store.take_dirty());

        store.set_liked(&post_id, true);
        assert!(store.is_liked(&post_id));
    }
}
