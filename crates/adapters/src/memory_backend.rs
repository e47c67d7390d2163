//! In-memory multi-user discussion backend
//!
//! Holds posts and replies for any number of sessions and publishes a full
//! snapshot on every change through `tokio::sync::watch` channels. Used by
//! tests and by the `simulate` command.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use threadline_domain::usecases::votes::{set_reaction_membership, set_vote_membership};
use threadline_domain::{
    BookmarkOutcome, Clock, DiscussionApi, DiscussionFeed, FeedError, LikeOutcome, NewReply,
    Post, PostId, ReactionRequest, RemoteError, Reply, ReplyId, ReplySnapshot, SnapshotStream,
    SolutionRequest, SystemClock, UserId, Viewer, VoteRequest,
};

struct PostRecord {
    post: Post,
    replies: Vec<Reply>,
    version: u64,
    replies_tx: watch::Sender<ReplySnapshot>,
    post_tx: watch::Sender<Post>,
}

impl PostRecord {
    fn new(post: Post) -> Self {
        let snapshot = ReplySnapshot {
            post_id: post.id.clone(),
            version: 1,
            replies: Vec::new(),
        };
        let (replies_tx, _) = watch::channel(snapshot);
        let (post_tx, _) = watch::channel(post.clone());
        Self {
            post,
            replies: Vec::new(),
            version: 1,
            replies_tx,
            post_tx,
        }
    }

    fn reply_mut(&mut self, reply_id: &ReplyId) -> Result<&mut Reply, RemoteError> {
        self.replies
            .iter_mut()
            .find(|r| &r.id == reply_id)
            .ok_or_else(|| RemoteError::NotFound(format!("reply {}", reply_id)))
    }

    fn publish_replies(&mut self) {
        self.version += 1;
        let mut replies = self.replies.clone();
        replies.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.replies_tx.send_replace(ReplySnapshot {
            post_id: self.post.id.clone(),
            version: self.version,
            replies,
        });
    }

    fn publish_post(&mut self) {
        self.post_tx.send_replace(self.post.clone());
    }
}

#[derive(Default)]
struct BackendState {
    posts: HashMap<PostId, PostRecord>,
    bookmarks: HashMap<UserId, BTreeSet<PostId>>,
    failures: VecDeque<RemoteError>,
}

/// Shared in-memory backend
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BackendState>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Server(e.to_string()))
    }

    /// Create a post authored by `author`
    pub fn create_post(
        &self,
        author: &Viewer,
        title: &str,
        body: &str,
    ) -> Result<PostId, RemoteError> {
        let post = Post {
            id: PostId::new(Uuid::new_v4().to_string()),
            author_id: author.user_id.clone(),
            author_name: author.display_name.clone(),
            title: title.to_string(),
            body: body.to_string(),
            tags: Default::default(),
            like_count: 0,
            liked_by: Vec::new(),
            reply_count: 0,
            view_count: 0,
            pinned: false,
            archived: false,
            solution_reply_ids: Vec::new(),
            media: Vec::new(),
            created_at: self.clock.now(),
        };
        let id = post.id.clone();
        self.lock()?.posts.insert(id.clone(), PostRecord::new(post));
        tracing::debug!(post_id = %id, "Created post");
        Ok(id)
    }

    /// Insert a reply record as-is and publish a snapshot
    pub fn insert_reply(&self, reply: Reply) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        let record = state
            .posts
            .get_mut(&reply.post_id)
            .ok_or_else(|| RemoteError::NotFound(format!("post {}", reply.post_id)))?;
        record.replies.push(reply);
        record.post.reply_count = record.replies.len() as u32;
        record.publish_replies();
        record.publish_post();
        Ok(())
    }

    /// Make the next mutation from any session fail with `error`
    pub fn fail_next(&self, error: RemoteError) -> Result<(), RemoteError> {
        self.lock()?.failures.push_back(error);
        Ok(())
    }

    pub fn post(&self, post_id: &PostId) -> Option<Post> {
        let state = self.lock().ok()?;
        state.posts.get(post_id).map(|r| r.post.clone())
    }

    pub fn replies(&self, post_id: &PostId) -> Vec<Reply> {
        self.lock()
            .ok()
            .and_then(|state| state.posts.get(post_id).map(|r| r.replies.clone()))
            .unwrap_or_default()
    }

    /// A session acting as `viewer`
    pub fn session(&self, viewer: Viewer) -> MemorySession {
        MemorySession {
            backend: self.clone(),
            viewer,
        }
    }

    fn mutate<T>(
        &self,
        post_id: &PostId,
        f: impl FnOnce(&mut PostRecord) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut state = self.lock()?;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        let record = state
            .posts
            .get_mut(post_id)
            .ok_or_else(|| RemoteError::NotFound(format!("post {}", post_id)))?;
        f(record)
    }
}

/// One user's connection to a [`MemoryBackend`]
#[derive(Clone)]
pub struct MemorySession {
    backend: MemoryBackend,
    viewer: Viewer,
}

impl MemorySession {
    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    fn may_moderate(&self, post: &Post) -> bool {
        self.viewer.is_admin || post.is_author(&self.viewer.user_id)
    }
}

#[async_trait]
impl DiscussionFeed for MemorySession {
    async fn subscribe_replies(
        &self,
        post_id: &PostId,
    ) -> Result<SnapshotStream<ReplySnapshot>, FeedError> {
        let state = self
            .backend
            .state
            .lock()
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        let record = state
            .posts
            .get(post_id)
            .ok_or_else(|| FeedError::NotFound(format!("post {}", post_id)))?;
        Ok(WatchStream::new(record.replies_tx.subscribe()).boxed())
    }

    async fn subscribe_post(&self, post_id: &PostId) -> Result<SnapshotStream<Post>, FeedError> {
        let state = self
            .backend
            .state
            .lock()
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        let record = state
            .posts
            .get(post_id)
            .ok_or_else(|| FeedError::NotFound(format!("post {}", post_id)))?;
        Ok(WatchStream::new(record.post_tx.subscribe()).boxed())
    }
}

#[async_trait]
impl DiscussionApi for MemorySession {
    async fn submit_reply(&self, reply: &NewReply) -> Result<ReplyId, RemoteError> {
        let now = self.backend.clock.now();
        self.backend.mutate(&reply.post_id, |record| {
            if let Some(parent) = &reply.parent_reply_id {
                if !record.replies.iter().any(|r| &r.id == parent) {
                    return Err(RemoteError::Rejected(format!(
                        "parent reply {} does not exist",
                        parent
                    )));
                }
            }

            let id = ReplyId::new(Uuid::new_v4().to_string());
            record.replies.push(Reply {
                id: id.clone(),
                post_id: reply.post_id.clone(),
                parent_reply_id: reply.parent_reply_id.clone(),
                author_id: self.viewer.user_id.clone(),
                author_name: self.viewer.display_name.clone(),
                body: reply.body.clone(),
                created_at: now,
                upvotes: 0,
                upvoted_by: Default::default(),
                downvotes: 0,
                downvoted_by: Default::default(),
                reactions: Default::default(),
                is_solution: false,
                media: reply.media.clone(),
                mentions: reply.mentions.clone(),
            });
            record.post.reply_count = record.replies.len() as u32;
            record.publish_replies();
            record.publish_post();
            Ok(id)
        })
    }

    async fn cast_vote(&self, request: &VoteRequest) -> Result<(), RemoteError> {
        self.backend.mutate(&request.post_id, |record| {
            let reply = record.reply_mut(&request.reply_id)?;
            set_vote_membership(reply, &self.viewer.user_id, request.to);
            record.publish_replies();
            Ok(())
        })
    }

    async fn cast_reaction(&self, request: &ReactionRequest) -> Result<(), RemoteError> {
        self.backend.mutate(&request.post_id, |record| {
            let reply = record.reply_mut(&request.reply_id)?;
            set_reaction_membership(reply, &self.viewer.user_id, request.new_kind.as_ref());
            record.publish_replies();
            Ok(())
        })
    }

    async fn set_solution(&self, request: &SolutionRequest) -> Result<(), RemoteError> {
        self.backend.mutate(&request.post_id, |record| {
            if !self.may_moderate(&record.post) {
                return Err(RemoteError::Unauthorized(
                    "only the post author or an administrator can mark solutions".to_string(),
                ));
            }
            let reply = record.reply_mut(&request.reply_id)?;
            reply.is_solution = request.desired;

            let ids = &mut record.post.solution_reply_ids;
            let listed = ids.contains(&request.reply_id);
            if request.desired && !listed {
                ids.push(request.reply_id.clone());
            } else if !request.desired && listed {
                ids.retain(|id| id != &request.reply_id);
            }

            record.publish_replies();
            record.publish_post();
            Ok(())
        })
    }

    async fn toggle_like(&self, post_id: &PostId) -> Result<LikeOutcome, RemoteError> {
        self.backend.mutate(post_id, |record| {
            let user = &self.viewer.user_id;
            let post = &mut record.post;
            let liked = if let Some(ix) = post.liked_by.iter().position(|u| u == user) {
                post.liked_by.remove(ix);
                false
            } else {
                post.liked_by.push(user.clone());
                true
            };
            post.like_count = post.liked_by.len() as u32;
            record.publish_post();
            Ok(LikeOutcome {
                liked,
                message: if liked { "Post liked" } else { "Like removed" }.to_string(),
            })
        })
    }

    async fn toggle_bookmark(&self, post_id: &PostId) -> Result<BookmarkOutcome, RemoteError> {
        let mut state = self.backend.lock()?;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if !state.posts.contains_key(post_id) {
            return Err(RemoteError::NotFound(format!("post {}", post_id)));
        }
        let bookmarks = state
            .bookmarks
            .entry(self.viewer.user_id.clone())
            .or_default();
        let bookmarked = if bookmarks.remove(post_id) {
            false
        } else {
            bookmarks.insert(post_id.clone());
            true
        };
        Ok(BookmarkOutcome {
            bookmarked,
            message: if bookmarked {
                "Post bookmarked"
            } else {
                "Bookmark removed"
            }
            .to_string(),
        })
    }

    async fn delete_reply(&self, post_id: &PostId, reply_id: &ReplyId) -> Result<(), RemoteError> {
        self.backend.mutate(post_id, |record| {
            let author = record
                .replies
                .iter()
                .find(|r| &r.id == reply_id)
                .map(|r| r.author_id.clone())
                .ok_or_else(|| RemoteError::NotFound(format!("reply {}", reply_id)))?;
            if author != self.viewer.user_id && !self.may_moderate(&record.post) {
                return Err(RemoteError::Unauthorized(
                    "only the reply author or a moderator can delete it".to_string(),
                ));
            }

            record.replies.retain(|r| &r.id != reply_id);
            record.post.reply_count = record.replies.len() as u32;
            let was_solution = record.post.solution_reply_ids.contains(reply_id);
            record.post.solution_reply_ids.retain(|id| id != reply_id);

            record.publish_replies();
            record.publish_post();
            if was_solution {
                tracing::debug!(reply_id = %reply_id, "Deleted reply was a solution");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_domain::policy::ReplyPolicy;
    use threadline_domain::usecases::{DiscussionController, MutationKey};
    use threadline_domain::{ReactionKind, VoteKind};

    use crate::state_memory::InMemoryInteractionRepo;
    use crate::upload_stub::StubUploader;

    fn setup() -> (MemoryBackend, PostId, MemorySession, MemorySession) {
        let backend = MemoryBackend::new();
        let op = Viewer::new("op", "Original Poster");
        let post_id = backend.create_post(&op, "Question", "How?").unwrap();
        let op_session = backend.session(op);
        let other = backend.session(Viewer::new("bob", "Bob"));
        (backend, post_id, op_session, other)
    }

    fn new_reply(post_id: &PostId, parent: Option<&ReplyId>, body: &str) -> NewReply {
        NewReply {
            post_id: post_id.clone(),
            parent_reply_id: parent.cloned(),
            body: body.to_string(),
            media: vec![],
            mentions: vec![],
        }
    }

    #[tokio::test]
    async fn test_snapshot_published_on_submit() {
        let (backend, post_id, _op, bob) = setup();
        let mut stream = bob.subscribe_replies(&post_id).await.unwrap();

        let initial = stream.next().await.unwrap();
        assert!(initial.replies.is_empty());

        let id = bob
            .submit_reply(&new_reply(&post_id, None, "first"))
            .await
            .unwrap();

        let snapshot = stream.next().await.unwrap();
        assert!(snapshot.version > initial.version);
        assert_eq!(snapshot.replies.len(), 1);
        assert_eq!(snapshot.replies[0].id, id);
        assert_eq!(backend.post(&post_id).unwrap().reply_count, 1);
    }

    #[tokio::test]
    async fn test_votes_are_idempotent_per_user() {
        let (backend, post_id, _op, bob) = setup();
        let id = bob
            .submit_reply(&new_reply(&post_id, None, "answer"))
            .await
            .unwrap();
        let request = VoteRequest {
            post_id: post_id.clone(),
            reply_id: id.clone(),
            kind: VoteKind::Up,
            from: None,
            to: Some(VoteKind::Up),
        };

        bob.cast_vote(&request).await.unwrap();
        bob.cast_vote(&request).await.unwrap();

        let reply = &backend.replies(&post_id)[0];
        assert_eq!(reply.upvotes, 1);
    }

    #[tokio::test]
    async fn test_solution_requires_author() {
        let (backend, post_id, op, bob) = setup();
        let id = bob
            .submit_reply(&new_reply(&post_id, None, "answer"))
            .await
            .unwrap();
        let request = SolutionRequest {
            post_id: post_id.clone(),
            reply_id: id.clone(),
            desired: true,
            caller_id: UserId::from("bob"),
        };

        let refused = bob.set_solution(&request).await;
        assert!(matches!(refused, Err(RemoteError::Unauthorized(_))));

        op.set_solution(&request).await.unwrap();
        assert!(backend.post(&post_id).unwrap().resolved());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let (backend, post_id, _op, bob) = setup();
        backend
            .fail_next(RemoteError::Network("timeout".to_string()))
            .unwrap();

        let result = bob.toggle_like(&post_id).await;
        assert!(matches!(result, Err(RemoteError::Network(_))));

        let outcome = bob.toggle_like(&post_id).await.unwrap();
        assert!(outcome.liked);
    }

    #[tokio::test]
    async fn test_unknown_parent_rejected() {
        let (_backend, post_id, _op, bob) = setup();
        let result = bob
            .submit_reply(&new_reply(&post_id, Some(&ReplyId::from("ghost")), "hi"))
            .await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    async fn settle_until<F, A, U, R>(
        controller: &mut DiscussionController<F, A, U, R>,
        mut done: impl FnMut(&DiscussionController<F, A, U, R>) -> bool,
    ) where
        F: DiscussionFeed + ?Sized + 'static,
        A: DiscussionApi + ?Sized + 'static,
        U: threadline_domain::AssetUploader + ?Sized + 'static,
        R: threadline_domain::InteractionRepo + ?Sized,
    {
        for _ in 0..50 {
            if done(&*controller) {
                return;
            }
            controller.next_event().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_two_sessions_converge() {
        let (backend, post_id, op, bob) = setup();
        let root = op
            .submit_reply(&new_reply(&post_id, None, "context"))
            .await
            .unwrap();

        let mut controller = DiscussionController::open(
            post_id.clone(),
            bob.viewer().clone(),
            Arc::new(bob.clone()),
            Arc::new(bob.clone()),
            Arc::new(StubUploader::new()),
            Arc::new(InMemoryInteractionRepo::new()),
            ReplyPolicy::default(),
        )
        .await
        .unwrap();

        settle_until(&mut controller, |c| !c.is_loading() && c.post().is_some()).await;
        assert_eq!(controller.forest().len(), 1);

        controller.vote(&root, VoteKind::Up).await.unwrap();
        controller
            .react(&root, &ReactionKind::from("heart"))
            .await
            .unwrap();
        settle_until(&mut controller, |c| {
            !c.is_pending(&MutationKey::Vote(root.clone()))
                && !c.is_pending(&MutationKey::Reaction(root.clone()))
        })
        .await;

        // Another user replies; the snapshot carries it in
        op.submit_reply(&new_reply(&post_id, Some(&root), "follow-up"))
            .await
            .unwrap();
        settle_until(&mut controller, |c| c.forest().len() == 2).await;

        let reply = &controller.forest().get(&root).unwrap().reply;
        assert_eq!(reply.upvotes, 1);
        assert_eq!(reply.reaction_count(&ReactionKind::from("heart")), 1);
        assert_eq!(backend.replies(&post_id).len(), 2);

        // Bob is not the author: refused locally, nothing sent
        let refused = controller.mark_solution(&root, true);
        assert!(refused.is_err());

        controller.close().await;
        assert!(controller.next_event().await.is_none());
    }
}
