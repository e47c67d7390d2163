//! Discussion controller - owns one open discussion view
//!
//! All state of a mounted discussion lives here and is mutated only from
//! `&mut self` methods: user actions, and `next_event`, which applies queued
//! feed snapshots, remote responses and upload notifications one at a time.

use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::error::{EngineError, ValidationError};
use crate::model::{
    LocalFile, NewReply, Post, PostId, ReactionKind, ReplyId, UserId, Viewer, VoteKind,
};
use crate::policy::{ReplyPolicy, extract_mentions};
use crate::ports::{AssetUploader, DiscussionApi, DiscussionFeed, InteractionRepo};
use crate::usecases::events::{DiscussionEvent, DiscussionUpdate};
use crate::usecases::feed::{FeedSubscription, LiveFeedSubscriber};
use crate::usecases::interactions::InteractionStateStore;
use crate::usecases::solution::{SolutionAuthorizer, SolutionChange, SolutionPropagator};
use crate::usecases::tree::ReplyForest;
use crate::usecases::upload::{PreviewRef, UploadPipeline, UploadState};
use crate::usecases::view::{DiscussionView, SnapshotDomain};
use crate::usecases::votes::{MutationKey, Settlement, VoteReactionEngine};

/// Connection state of the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Waiting for the first reply snapshot
    Connecting,
    Live,
    Closed,
}

pub struct DiscussionController<F, A, U, R>
where
    F: DiscussionFeed + ?Sized + 'static,
    A: DiscussionApi + ?Sized + 'static,
    U: AssetUploader + ?Sized + 'static,
    R: InteractionRepo + ?Sized,
{
    post_id: PostId,
    viewer: Viewer,
    api: Arc<A>,
    repo: Arc<R>,
    policy: ReplyPolicy,
    subscriber: LiveFeedSubscriber<F>,
    subscription: FeedSubscription,
    status: FeedStatus,
    last_version: Option<u64>,
    view: DiscussionView,
    ledger: InteractionStateStore,
    engine: VoteReactionEngine<A>,
    solutions: SolutionPropagator,
    upload: UploadPipeline<U>,
    events: UnboundedReceiver<DiscussionEvent>,
}

impl<F, A, U, R> DiscussionController<F, A, U, R>
where
    F: DiscussionFeed + ?Sized + 'static,
    A: DiscussionApi + ?Sized + 'static,
    U: AssetUploader + ?Sized + 'static,
    R: InteractionRepo + ?Sized,
{
    /// Open a discussion: load the persisted ledger and subscribe to the feed
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        post_id: PostId,
        viewer: Viewer,
        feed: Arc<F>,
        api: Arc<A>,
        uploader: Arc<U>,
        repo: Arc<R>,
        policy: ReplyPolicy,
    ) -> Result<Self, EngineError> {
        let state = match repo.load(&viewer.user_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(user_id = %viewer.user_id, error = %e, "Failed to load interaction ledger, starting empty");
                Default::default()
            }
        };
        let ledger = InteractionStateStore::with_state(viewer.user_id.clone(), state);

        let (tx, rx) = unbounded_channel();
        let mut subscriber = LiveFeedSubscriber::new(feed, tx.clone());
        let subscription = subscriber.subscribe(&post_id).await?;

        tracing::info!(post_id = %post_id, user_id = %viewer.user_id, "Opened discussion");

        Ok(Self {
            engine: VoteReactionEngine::new(
                Arc::clone(&api),
                post_id.clone(),
                viewer.clone(),
                tx.clone(),
            ),
            upload: UploadPipeline::new(uploader, policy.clone(), tx),
            post_id,
            viewer,
            api,
            repo,
            policy,
            subscriber,
            subscription,
            status: FeedStatus::Connecting,
            last_version: None,
            view: DiscussionView::default(),
            ledger,
            solutions: SolutionPropagator::default(),
            events: rx,
        })
    }

    /// Replace the rule deciding who may mark solutions
    pub fn with_authorizer(mut self, authorize: SolutionAuthorizer) -> Self {
        self.solutions = SolutionPropagator::new(authorize);
        self
    }

    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }

    /// True until the first reply snapshot has been applied
    pub fn is_loading(&self) -> bool {
        self.status == FeedStatus::Connecting
    }

    pub fn view(&self) -> &DiscussionView {
        &self.view
    }

    pub fn post(&self) -> Option<&Post> {
        self.view.post.as_ref()
    }

    pub fn forest(&self) -> &ReplyForest {
        &self.view.forest
    }

    pub fn ledger(&self) -> &InteractionStateStore {
        &self.ledger
    }

    pub fn upload_state(&self) -> &UploadState {
        self.upload.state()
    }

    pub fn is_pending(&self, key: &MutationKey) -> bool {
        self.engine.is_pending(key)
    }

    /// Number of toggles still awaiting confirmation
    pub fn pending_count(&self) -> usize {
        self.engine.pending_count()
    }

    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }

    /// Wait for the next queued event and apply it.
    ///
    /// Returns `None` once the discussion has been closed.
    pub async fn next_event(&mut self) -> Option<DiscussionUpdate> {
        if self.status == FeedStatus::Closed {
            return None;
        }
        let event = self.events.recv().await?;
        let update = self.apply(event);
        self.persist().await;
        Some(update)
    }

    /// Apply every event already queued without waiting
    pub async fn drain_events(&mut self) -> Vec<DiscussionUpdate> {
        let mut updates = Vec::new();
        while self.status != FeedStatus::Closed {
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            updates.push(self.apply(event));
        }
        self.persist().await;
        updates
    }

    fn apply(&mut self, event: DiscussionEvent) -> DiscussionUpdate {
        match event {
            DiscussionEvent::Replies {
                subscription,
                snapshot,
            } => {
                if subscription != self.subscription.id() || !self.subscription.is_active() {
                    return DiscussionUpdate::Ignored;
                }
                if self.last_version.is_some_and(|last| snapshot.version <= last) {
                    tracing::debug!(
                        version = snapshot.version,
                        last = ?self.last_version,
                        "Discarding superseded reply snapshot"
                    );
                    return DiscussionUpdate::SnapshotSuperseded {
                        version: snapshot.version,
                    };
                }

                let version = snapshot.version;
                self.view.forest = ReplyForest::build(snapshot.replies);
                self.ledger.seed_from_replies(&self.view.forest);
                self.engine.rebase(&mut self.view, SnapshotDomain::Replies);
                self.last_version = Some(version);
                if self.status == FeedStatus::Connecting {
                    self.status = FeedStatus::Live;
                }

                let count = self.view.forest.len();
                tracing::debug!(post_id = %self.post_id, version, count, "Applied reply snapshot");
                DiscussionUpdate::RepliesReplaced { version, count }
            }
            DiscussionEvent::Post { subscription, post } => {
                if subscription != self.subscription.id() || !self.subscription.is_active() {
                    return DiscussionUpdate::Ignored;
                }
                self.ledger.seed_from_post(&post);
                self.view.post = Some(post);
                self.engine.rebase(&mut self.view, SnapshotDomain::Post);
                DiscussionUpdate::PostReplaced
            }
            DiscussionEvent::FeedEnded {
                subscription,
                stream,
            } => {
                if subscription != self.subscription.id() {
                    return DiscussionUpdate::Ignored;
                }
                tracing::warn!(post_id = %self.post_id, stream = ?stream, "Discussion feed ended");
                DiscussionUpdate::FeedEnded(stream)
            }
            DiscussionEvent::MutationSettled {
                ticket,
                key,
                result,
            } => {
                match self
                    .engine
                    .settle(&mut self.view, &mut self.ledger, ticket, &key, result)
                {
                    Settlement::Confirmed => DiscussionUpdate::MutationConfirmed(key),
                    Settlement::FollowUp => DiscussionUpdate::MutationFollowUp(key),
                    Settlement::RolledBack(error) => {
                        DiscussionUpdate::MutationRolledBack { key, error }
                    }
                    Settlement::Dropped => DiscussionUpdate::MutationDropped(key),
                    Settlement::Stale => DiscussionUpdate::Ignored,
                }
            }
            DiscussionEvent::UploadStarted { attempt } => self.upload.on_started(attempt),
            DiscussionEvent::UploadProgress { attempt, percent } => {
                self.upload.on_progress(attempt, percent)
            }
            DiscussionEvent::UploadFinished { attempt, result } => {
                self.upload.on_finished(attempt, result)
            }
        }
    }

    pub async fn vote(
        &mut self,
        reply_id: &ReplyId,
        kind: VoteKind,
    ) -> Result<Option<VoteKind>, EngineError> {
        let next = self
            .engine
            .toggle_vote(&mut self.view, &mut self.ledger, reply_id, kind)?;
        self.persist().await;
        Ok(next)
    }

    pub async fn react(
        &mut self,
        reply_id: &ReplyId,
        kind: &ReactionKind,
    ) -> Result<Option<ReactionKind>, EngineError> {
        let next = self
            .engine
            .toggle_reaction(&mut self.view, &mut self.ledger, reply_id, kind)?;
        self.persist().await;
        Ok(next)
    }

    pub async fn toggle_like(&mut self) -> Result<bool, EngineError> {
        let liked = self.engine.toggle_like(&mut self.view, &mut self.ledger)?;
        self.persist().await;
        Ok(liked)
    }

    pub async fn toggle_bookmark(&mut self) -> Result<bool, EngineError> {
        let bookmarked = self
            .engine
            .toggle_bookmark(&mut self.view, &mut self.ledger)?;
        self.persist().await;
        Ok(bookmarked)
    }

    /// Mark or unmark a solution; refused without any change when unauthorized
    pub fn mark_solution(
        &mut self,
        reply_id: &ReplyId,
        desired: bool,
    ) -> Result<SolutionChange, EngineError> {
        let change = self
            .solutions
            .mark_solution(&mut self.view, &self.viewer, reply_id, desired)?;
        self.engine
            .set_solution(&mut self.view, &mut self.ledger, &change);
        Ok(change)
    }

    pub fn select_file(&mut self, file: LocalFile) -> Result<PreviewRef, EngineError> {
        Ok(self.upload.select_file(file)?)
    }

    pub fn cancel_upload(&mut self) {
        self.upload.cancel();
    }

    pub fn clear_attachment(&mut self) {
        self.upload.clear();
    }

    /// Validate and submit a reply.
    ///
    /// Mentions are extracted from the body when not given. Nothing reaches
    /// the network while an attachment is uploading or failed.
    pub async fn submit_reply(
        &mut self,
        parent: Option<&ReplyId>,
        body: &str,
        mentions: Option<Vec<UserId>>,
    ) -> Result<ReplyId, EngineError> {
        let mentions = mentions.unwrap_or_else(|| extract_mentions(body));
        self.policy.validate_reply(body, &mentions)?;

        if let Some(parent) = parent {
            if !self.view.forest.contains(parent) {
                return Err(ValidationError::UnknownParent(parent.clone()).into());
            }
        }

        let media = self.upload.attachments_for_submit()?;
        let attached = !media.is_empty();

        let reply = NewReply {
            post_id: self.post_id.clone(),
            parent_reply_id: parent.cloned(),
            body: body.to_string(),
            media,
            mentions,
        };

        let reply_id = self.api.submit_reply(&reply).await.map_err(|e| {
            tracing::warn!(post_id = %self.post_id, error = %e, "Reply submission failed");
            EngineError::from(e)
        })?;

        if attached {
            self.upload.clear();
        }

        tracing::info!(post_id = %self.post_id, reply_id = %reply_id, "Reply submitted");
        Ok(reply_id)
    }

    /// Delete a reply; it disappears when the next snapshot arrives
    pub async fn delete_reply(&mut self, reply_id: &ReplyId) -> Result<(), EngineError> {
        if !self.view.forest.contains(reply_id) {
            return Err(EngineError::NotFound(format!("reply {}", reply_id)));
        }
        self.api.delete_reply(&self.post_id, reply_id).await?;
        tracing::info!(post_id = %self.post_id, reply_id = %reply_id, "Reply deleted");
        Ok(())
    }

    /// Replace the feed subscription with a fresh one.
    ///
    /// Versions restart with the new subscription, and anything still queued
    /// from the old one is ignored.
    pub async fn reconnect(&mut self) -> Result<(), EngineError> {
        self.subscription.close();
        self.subscription = self.subscriber.subscribe(&self.post_id).await?;
        self.status = FeedStatus::Connecting;
        self.last_version = None;
        Ok(())
    }

    /// Tear down the subscription and any upload; saves the ledger
    pub async fn close(&mut self) {
        self.subscription.close();
        self.upload.cancel();
        self.status = FeedStatus::Closed;
        self.persist().await;
        tracing::info!(post_id = %self.post_id, "Closed discussion");
    }

    async fn persist(&mut self) {
        if !self.ledger.take_dirty() {
            return;
        }
        if let Err(e) = self
            .repo
            .save(self.ledger.user_id(), self.ledger.state())
            .await
        {
            tracing::warn!(user_id = %self.ledger.user_id(), error = %e, "Failed to persist interaction ledger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AssetDescriptor, AssetId, AssetKind, BookmarkOutcome, InteractionState, LikeOutcome,
        ReactionRequest, Reply, ReplySnapshot, SolutionRequest, VoteRequest,
    };
    use crate::ports::{
        FeedError, RemoteError, SnapshotStream, StoreError, UploadError, UploadProgress,
    };
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use time::{Duration, OffsetDateTime};
    use tokio::sync::Notify;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    struct FakeFeed {
        replies: Mutex<Option<UnboundedReceiver<ReplySnapshot>>>,
        posts: Mutex<Option<UnboundedReceiver<Post>>>,
    }

    #[async_trait]
    impl DiscussionFeed for FakeFeed {
        async fn subscribe_replies(
            &self,
            post_id: &PostId,
        ) -> Result<SnapshotStream<ReplySnapshot>, FeedError> {
            let rx = self.replies.lock().unwrap().take();
            let rx = rx.ok_or_else(|| FeedError::NotFound(post_id.to_string()))?;
            Ok(UnboundedReceiverStream::new(rx).boxed())
        }

        async fn subscribe_post(&self, post_id: &PostId) -> Result<SnapshotStream<Post>, FeedError> {
            let rx = self.posts.lock().unwrap().take();
            let rx = rx.ok_or_else(|| FeedError::NotFound(post_id.to_string()))?;
            Ok(UnboundedReceiverStream::new(rx).boxed())
        }
    }

    #[derive(Default)]
    struct FakeApi {
        submitted: Mutex<Vec<NewReply>>,
        votes: Mutex<Vec<VoteRequest>>,
        solutions: Mutex<Vec<SolutionRequest>>,
        deleted: Mutex<Vec<ReplyId>>,
        hold_votes: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl DiscussionApi for FakeApi {
        async fn submit_reply(&self, reply: &NewReply) -> Result<ReplyId, RemoteError> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(reply.clone());
            Ok(ReplyId::new(format!("new-{}", submitted.len())))
        }

        async fn cast_vote(&self, request: &VoteRequest) -> Result<(), RemoteError> {
            self.votes.lock().unwrap().push(request.clone());
            if self.hold_votes.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            Ok(())
        }

        async fn cast_reaction(&self, _request: &ReactionRequest) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn set_solution(&self, request: &SolutionRequest) -> Result<(), RemoteError> {
            self.solutions.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn toggle_like(&self, _post_id: &PostId) -> Result<LikeOutcome, RemoteError> {
            Ok(LikeOutcome {
                liked: true,
                message: "Post liked".to_string(),
            })
        }

        async fn toggle_bookmark(&self, _post_id: &PostId) -> Result<BookmarkOutcome, RemoteError> {
            Ok(BookmarkOutcome {
                bookmarked: true,
                message: "Post bookmarked".to_string(),
            })
        }

        async fn delete_reply(&self, _post_id: &PostId, reply_id: &ReplyId) -> Result<(), RemoteError> {
            self.deleted.lock().unwrap().push(reply_id.clone());
            Ok(())
        }
    }

    /// Uploads wait for `release` and then return the scripted outcome
    struct FakeUploader {
        outcome: Mutex<Result<AssetDescriptor, UploadError>>,
        release: Notify,
    }

    #[async_trait]
    impl AssetUploader for FakeUploader {
        async fn upload_asset(
            &self,
            _file: &LocalFile,
            progress: &UploadProgress,
        ) -> Result<AssetDescriptor, UploadError> {
            progress.report(30);
            self.release.notified().await;
            self.outcome.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct FakeRepo {
        saved: Mutex<Option<InteractionState>>,
    }

    #[async_trait]
    impl InteractionRepo for FakeRepo {
        async fn load(&self, _user_id: &UserId) -> Result<InteractionState, StoreError> {
            Ok(self.saved.lock().unwrap().clone().unwrap_or_default())
        }

        async fn save(&self, _user_id: &UserId, state: &InteractionState) -> Result<(), StoreError> {
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }
    }

    type Controller = DiscussionController<FakeFeed, FakeApi, FakeUploader, FakeRepo>;

    struct Harness {
        controller: Controller,
        replies: UnboundedSender<ReplySnapshot>,
        posts: UnboundedSender<Post>,
        api: Arc<FakeApi>,
        uploader: Arc<FakeUploader>,
        repo: Arc<FakeRepo>,
    }

    async fn harness(viewer: Viewer, upload: Result<AssetDescriptor, UploadError>) -> Harness {
        let (reply_tx, reply_rx) = unbounded_channel();
        let (post_tx, post_rx) = unbounded_channel();
        let feed = Arc::new(FakeFeed {
            replies: Mutex::new(Some(reply_rx)),
            posts: Mutex::new(Some(post_rx)),
        });
        let api = Arc::new(FakeApi::default());
        let uploader = Arc::new(FakeUploader {
            outcome: Mutex::new(upload),
            release: Notify::new(),
        });
        let repo = Arc::new(FakeRepo::default());

        let controller = DiscussionController::open(
            PostId::from("post"),
            viewer,
            feed,
            Arc::clone(&api),
            Arc::clone(&uploader),
            Arc::clone(&repo),
            ReplyPolicy::default(),
        )
        .await
        .unwrap();

        Harness {
            controller,
            replies: reply_tx,
            posts: post_tx,
            api,
            uploader,
            repo,
        }
    }

    fn asset() -> AssetDescriptor {
        AssetDescriptor {
            id: AssetId::from("asset-1"),
            kind: AssetKind::Image,
            byte_size: 3,
            url: "https://cdn.example/asset-1.png".to_string(),
            thumbnail_url: None,
        }
    }

    fn post() -> Post {
        Post {
            id: PostId::from("post"),
            author_id: UserId::from("op"),
            author_name: "OP".to_string(),
            title: "Why does it hang?".to_string(),
            body: "Details inside".to_string(),
            tags: Default::default(),
            like_count: 0,
            liked_by: vec![],
            reply_count: 2,
            view_count: 10,
            pinned: false,
            archived: false,
            solution_reply_ids: vec![],
            media: vec![],
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn reply(id: &str, parent: Option<&str>, t: i64) -> Reply {
        Reply {
            id: ReplyId::from(id),
            post_id: PostId::from("post"),
            parent_reply_id: parent.map(ReplyId::from),
            author_id: UserId::from("someone"),
            author_name: "Someone".to_string(),
            body: "text".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(t),
            upvotes: 0,
            upvoted_by: Default::default(),
            downvotes: 0,
            downvoted_by: Default::default(),
            reactions: Default::default(),
            is_solution: false,
            media: vec![],
            mentions: vec![],
        }
    }

    fn snapshot(version: u64, replies: Vec<Reply>) -> ReplySnapshot {
        ReplySnapshot {
            post_id: PostId::from("post"),
            version,
            replies,
        }
    }

    impl Harness {
        async fn push_replies(&mut self, version: u64, replies: Vec<Reply>) -> DiscussionUpdate {
            self.replies.send(snapshot(version, replies)).unwrap();
            self.controller.next_event().await.unwrap()
        }

        async fn push_post(&mut self, post: Post) -> DiscussionUpdate {
            self.posts.send(post).unwrap();
            self.controller.next_event().await.unwrap()
        }

        fn counts(&self, id: &str) -> (u32, u32) {
            let reply = &self.controller.forest().get(&ReplyId::from(id)).unwrap().reply;
            (reply.upvotes, reply.downvotes)
        }
    }

    #[tokio::test]
    async fn test_loading_until_first_snapshot() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        assert!(h.controller.is_loading());
        assert_eq!(h.controller.status(), FeedStatus::Connecting);

        let update = h.push_replies(1, vec![reply("b", Some("a"), 2), reply("a", None, 1)]).await;

        assert_eq!(update, DiscussionUpdate::RepliesReplaced { version: 1, count: 2 });
        assert!(!h.controller.is_loading());
        let forest = h.controller.forest();
        assert_eq!(forest.roots().len(), 1);
        assert_eq!(forest.node(forest.roots()[0]).reply.id, ReplyId::from("a"));
    }

    #[tokio::test]
    async fn test_older_snapshot_is_superseded() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(2, vec![reply("a", None, 1), reply("b", None, 2)]).await;

        let update = h.push_replies(1, vec![reply("a", None, 1)]).await;

        assert_eq!(update, DiscussionUpdate::SnapshotSuperseded { version: 1 });
        assert_eq!(h.controller.forest().len(), 2);
        assert_eq!(h.controller.last_version(), Some(2));
    }

    #[tokio::test]
    async fn test_vote_scenario_and_persistence() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![reply("x", None, 1)]).await;
        let x = ReplyId::from("x");

        assert_eq!(h.controller.vote(&x, VoteKind::Up).await.unwrap(), Some(VoteKind::Up));
        assert_eq!(h.counts("x"), (1, 0));
        assert!(h.controller.is_pending(&MutationKey::Vote(x.clone())));
        h.controller.next_event().await;

        h.controller.vote(&x, VoteKind::Up).await.unwrap();
        assert_eq!(h.counts("x"), (0, 0));
        h.controller.next_event().await;

        h.controller.vote(&x, VoteKind::Down).await.unwrap();
        assert_eq!(h.counts("x"), (0, 1));
        assert_eq!(
            h.controller.next_event().await,
            Some(DiscussionUpdate::MutationConfirmed(MutationKey::Vote(x.clone())))
        );

        let saved = h.repo.saved.lock().unwrap().clone().unwrap();
        assert_eq!(saved.votes.get(&x), Some(&Some(VoteKind::Down)));
    }

    #[tokio::test]
    async fn test_feed_wins_after_confirmation() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![reply("x", None, 1)]).await;
        let x = ReplyId::from("x");

        h.controller.vote(&x, VoteKind::Up).await.unwrap();
        h.controller.next_event().await;

        let mut authoritative = reply("x", None, 1);
        authoritative.upvotes = 5;
        authoritative.upvoted_by = ["me", "a", "b", "c", "d"].into_iter().map(UserId::from).collect();
        h.push_replies(2, vec![authoritative]).await;

        assert_eq!(h.counts("x"), (5, 0));
        assert_eq!(h.controller.ledger().vote(&x), Some(VoteKind::Up));
        assert!(!h.controller.is_pending(&MutationKey::Vote(x)));
    }

    #[tokio::test]
    async fn test_in_flight_vote_on_deleted_reply_is_silent() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![reply("x", None, 1), reply("y", None, 2)]).await;
        h.api.hold_votes.store(true, Ordering::SeqCst);

        h.controller.vote(&ReplyId::from("y"), VoteKind::Up).await.unwrap();
        let update = h.push_replies(2, vec![reply("x", None, 1)]).await;
        assert_eq!(update, DiscussionUpdate::RepliesReplaced { version: 2, count: 1 });

        h.api.release.notify_one();
        let update = h.controller.next_event().await.unwrap();

        assert_eq!(
            update,
            DiscussionUpdate::MutationDropped(MutationKey::Vote(ReplyId::from("y")))
        );
        assert!(!h.controller.forest().contains(&ReplyId::from("y")));
        assert!(!h.controller.is_pending(&MutationKey::Vote(ReplyId::from("y"))));
    }

    #[tokio::test]
    async fn test_submit_rejected_while_uploading_without_network_call() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![]).await;

        h.controller
            .select_file(LocalFile::new("a.png", "image/png", vec![1, 2, 3]))
            .unwrap();
        assert_eq!(
            h.controller.next_event().await,
            Some(DiscussionUpdate::UploadStarted)
        );
        assert_eq!(h.controller.upload_state().phase(), "uploading");

        let result = h.controller.submit_reply(None, "see attached", None).await;

        assert_eq!(
            result,
            Err(EngineError::Validation(ValidationError::UploadInProgress))
        );
        assert!(h.api.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_blocks_submit_until_cleared() {
        let mut h = harness(
            Viewer::new("me", "Me"),
            Err(UploadError::Network("connection reset".to_string())),
        )
        .await;
        h.push_replies(1, vec![]).await;

        h.controller
            .select_file(LocalFile::new("a.png", "image/png", vec![1, 2, 3]))
            .unwrap();
        h.uploader.release.notify_one();
        loop {
            if let Some(DiscussionUpdate::UploadFailed(_)) = h.controller.next_event().await {
                break;
            }
        }
        assert_eq!(h.controller.upload_state().phase(), "failed");

        let result = h.controller.submit_reply(None, "retry", None).await;
        assert_eq!(
            result,
            Err(EngineError::Validation(ValidationError::AttachmentFailed))
        );
        assert!(h.api.submitted.lock().unwrap().is_empty());

        h.controller.clear_attachment();
        assert_eq!(h.controller.upload_state(), &UploadState::Idle);
        assert!(h.controller.submit_reply(None, "retry", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_carries_attachment_and_mentions() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![reply("a", None, 1)]).await;

        h.controller
            .select_file(LocalFile::new("a.png", "image/png", vec![1, 2, 3]))
            .unwrap();
        h.uploader.release.notify_one();
        loop {
            if let Some(DiscussionUpdate::UploadAttached(_)) = h.controller.next_event().await {
                break;
            }
        }

        let id = h
            .controller
            .submit_reply(Some(&ReplyId::from("a")), "thanks @alice", None)
            .await
            .unwrap();

        assert_eq!(id, ReplyId::from("new-1"));
        let submitted = h.api.submitted.lock().unwrap()[0].clone();
        assert_eq!(submitted.parent_reply_id, Some(ReplyId::from("a")));
        assert_eq!(submitted.media, vec![asset()]);
        assert_eq!(submitted.mentions, vec![UserId::from("alice")]);
        assert_eq!(h.controller.upload_state(), &UploadState::Idle);
    }

    #[tokio::test]
    async fn test_submit_validation_happens_before_network() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![]).await;

        let empty = h.controller.submit_reply(None, "   ", None).await;
        assert_eq!(empty, Err(EngineError::Validation(ValidationError::EmptyBody)));

        let orphan = h
            .controller
            .submit_reply(Some(&ReplyId::from("ghost")), "hello", None)
            .await;
        assert!(matches!(
            orphan,
            Err(EngineError::Validation(ValidationError::UnknownParent(_)))
        ));
        assert!(h.api.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_solution_by_author_updates_post() {
        let mut h = harness(Viewer::new("op", "OP"), Ok(asset())).await;
        h.push_replies(1, vec![reply("a", None, 1), reply("b", Some("a"), 2)]).await;
        h.push_post(post()).await;

        let change = h.controller.mark_solution(&ReplyId::from("b"), true).unwrap();
        assert!(!change.previous);
        assert!(h.controller.post().unwrap().resolved());

        let update = h.controller.next_event().await.unwrap();
        assert_eq!(
            update,
            DiscussionUpdate::MutationConfirmed(MutationKey::Solution(ReplyId::from("b")))
        );
        assert_eq!(h.api.solutions.lock().unwrap()[0].caller_id, UserId::from("op"));
    }

    #[tokio::test]
    async fn test_solution_refused_for_other_users() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![reply("a", None, 1)]).await;
        h.push_post(post()).await;

        let result = h.controller.mark_solution(&ReplyId::from("a"), true);

        assert!(matches!(result, Err(EngineError::Authorization(_))));
        assert!(!h.controller.post().unwrap().resolved());
        assert!(h.controller.drain_events().await.is_empty());
        assert!(h.api.solutions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_like_and_bookmark() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![]).await;
        h.push_post(post()).await;

        assert!(h.controller.toggle_like().await.unwrap());
        assert_eq!(h.controller.post().unwrap().like_count, 1);
        assert!(h.controller.toggle_bookmark().await.unwrap());
        assert!(h.controller.ledger().is_bookmarked(&PostId::from("post")));
    }

    #[tokio::test]
    async fn test_delete_reply_waits_for_snapshot() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![reply("a", None, 1), reply("b", Some("a"), 2)]).await;

        h.controller.delete_reply(&ReplyId::from("a")).await.unwrap();
        assert!(h.controller.forest().contains(&ReplyId::from("a")));
        assert_eq!(*h.api.deleted.lock().unwrap(), vec![ReplyId::from("a")]);

        h.push_replies(2, vec![reply("b", Some("a"), 2)]).await;
        let forest = h.controller.forest();
        assert_eq!(forest.node(forest.roots()[0]).reply.id, ReplyId::from("b"));

        let missing = h.controller.delete_reply(&ReplyId::from("a")).await;
        assert!(matches!(missing, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_no_updates_after_close() {
        let mut h = harness(Viewer::new("me", "Me"), Ok(asset())).await;
        h.push_replies(1, vec![reply("a", None, 1)]).await;

        h.controller.close().await;
        let _ = h.replies.send(snapshot(2, vec![]));

        assert_eq!(h.controller.status(), FeedStatus::Closed);
        assert_eq!(h.controller.next_event().await, None);
        assert_eq!(h.controller.forest().len(), 1);
    }
}
