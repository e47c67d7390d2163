//! Vote and reaction engine - optimistic toggles with rollback
//!
//! Every toggle follows the same protocol: the new state is applied to the
//! view and the ledger immediately, the remote mutation runs on a spawned
//! task, and its completion comes back through the controller's event queue
//! where it is confirmed or rolled back. At most one call per key is in
//! flight; toggles issued meanwhile are coalesced into a single follow-up.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::EngineError;
use crate::model::{
    Post, PostId, ReactionKind, ReactionRequest, Reply, ReplyId, SolutionRequest, UserId, Viewer,
    VoteKind, VoteRequest,
};
use crate::ports::{DiscussionApi, RemoteError};
use crate::usecases::events::DiscussionEvent;
use crate::usecases::interactions::InteractionStateStore;
use crate::usecases::solution::{SolutionChange, apply_solution};
use crate::usecases::view::{DiscussionView, SnapshotDomain};

/// Next vote state when `pressed` is applied in state `current`
pub fn next_vote(current: Option<VoteKind>, pressed: VoteKind) -> Option<VoteKind> {
    if current == Some(pressed) {
        None
    } else {
        Some(pressed)
    }
}

/// Next reaction when `pressed` is applied while holding `current`
pub fn next_reaction(current: Option<&ReactionKind>, pressed: &ReactionKind) -> Option<ReactionKind> {
    if current == Some(pressed) {
        None
    } else {
        Some(pressed.clone())
    }
}

/// Move a user to exactly one of the vote sets (or none) in one step.
///
/// Counters only move when membership actually changes, so re-applying the
/// same state never double counts.
pub fn set_vote_membership(reply: &mut Reply, user: &UserId, vote: Option<VoteKind>) {
    if vote != Some(VoteKind::Up) && reply.upvoted_by.remove(user) {
        reply.upvotes = reply.upvotes.saturating_sub(1);
    }
    if vote != Some(VoteKind::Down) && reply.downvoted_by.remove(user) {
        reply.downvotes = reply.downvotes.saturating_sub(1);
    }
    match vote {
        Some(VoteKind::Up) => {
            if reply.upvoted_by.insert(user.clone()) {
                reply.upvotes = reply.upvotes.saturating_add(1);
            }
        }
        Some(VoteKind::Down) => {
            if reply.downvoted_by.insert(user.clone()) {
                reply.downvotes = reply.downvotes.saturating_add(1);
            }
        }
        None => {}
    }
}

/// Give a user exactly one reaction (or none) on a reply
pub fn set_reaction_membership(reply: &mut Reply, user: &UserId, reaction: Option<&ReactionKind>) {
    for (kind, users) in reply.reactions.iter_mut() {
        if Some(kind) != reaction {
            users.remove(user);
        }
    }
    reply.reactions.retain(|_, users| !users.is_empty());
    if let Some(kind) = reaction {
        reply
            .reactions
            .entry(kind.clone())
            .or_default()
            .insert(user.clone());
    }
}

/// Add or remove a user from a post's likers
pub fn set_like_membership(post: &mut Post, user: &UserId, liked: bool) {
    let position = post.liked_by.iter().position(|u| u == user);
    match (liked, position) {
        (true, None) => {
            post.liked_by.push(user.clone());
            post.like_count = post.like_count.saturating_add(1);
        }
        (false, Some(ix)) => {
            post.liked_by.remove(ix);
            post.like_count = post.like_count.saturating_sub(1);
        }
        _ => {}
    }
}

/// Identifies one toggle target and kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationKey {
    Vote(ReplyId),
    Reaction(ReplyId),
    Solution(ReplyId),
    Like(PostId),
    Bookmark(PostId),
}

impl MutationKey {
    /// The subscription whose snapshots confirm this kind of change
    fn domain(&self) -> Option<SnapshotDomain> {
        match self {
            MutationKey::Vote(_) | MutationKey::Reaction(_) => Some(SnapshotDomain::Replies),
            MutationKey::Solution(_) | MutationKey::Like(_) => Some(SnapshotDomain::Post),
            MutationKey::Bookmark(_) => None,
        }
    }

    fn reply_id(&self) -> Option<&ReplyId> {
        match self {
            MutationKey::Vote(id) | MutationKey::Reaction(id) | MutationKey::Solution(id) => {
                Some(id)
            }
            MutationKey::Like(_) | MutationKey::Bookmark(_) => None,
        }
    }
}

/// The state a toggle moves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Vote(Option<VoteKind>),
    Reaction(Option<ReactionKind>),
    Flag(bool),
}

/// Successful remote response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAck {
    Done,
    Liked(bool),
    Bookmarked(bool),
}

/// Outcome of feeding a remote response back into the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Confirmed,
    FollowUp,
    RolledBack(EngineError),
    Dropped,
    Stale,
}

#[derive(Debug, Clone)]
struct PendingSlot {
    ticket: u64,
    /// Last state the server is known to hold
    baseline: Choice,
    /// State requested by the call currently in flight
    in_flight: Choice,
    /// Latest state the user asked for
    desired: Choice,
    /// Call succeeded; waiting for the next snapshot to take over
    settled: bool,
}

enum RemoteCall {
    Vote(VoteRequest),
    Reaction(ReactionRequest),
    Solution(SolutionRequest),
    Like(PostId),
    Bookmark(PostId),
}

impl RemoteCall {
    async fn execute<A: DiscussionApi + ?Sized>(self, api: &A) -> Result<RemoteAck, RemoteError> {
        match self {
            RemoteCall::Vote(request) => api.cast_vote(&request).await.map(|_| RemoteAck::Done),
            RemoteCall::Reaction(request) => {
                api.cast_reaction(&request).await.map(|_| RemoteAck::Done)
            }
            RemoteCall::Solution(request) => {
                api.set_solution(&request).await.map(|_| RemoteAck::Done)
            }
            RemoteCall::Like(post_id) => api
                .toggle_like(&post_id)
                .await
                .map(|outcome| RemoteAck::Liked(outcome.liked)),
            RemoteCall::Bookmark(post_id) => api
                .toggle_bookmark(&post_id)
                .await
                .map(|outcome| RemoteAck::Bookmarked(outcome.bookmarked)),
        }
    }
}

/// Optimistic toggle engine for one discussion and one session
pub struct VoteReactionEngine<A: DiscussionApi + ?Sized + 'static> {
    api: Arc<A>,
    post_id: PostId,
    viewer: Viewer,
    events: UnboundedSender<DiscussionEvent>,
    slots: HashMap<MutationKey, PendingSlot>,
    next_ticket: u64,
}

impl<A: DiscussionApi + ?Sized + 'static> VoteReactionEngine<A> {
    pub fn new(
        api: Arc<A>,
        post_id: PostId,
        viewer: Viewer,
        events: UnboundedSender<DiscussionEvent>,
    ) -> Self {
        Self {
            api,
            post_id,
            viewer,
            events,
            slots: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Whether a toggle for `key` is still unconfirmed
    pub fn is_pending(&self, key: &MutationKey) -> bool {
        self.slots.get(key).is_some_and(|slot| !slot.settled)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|slot| !slot.settled).count()
    }

    pub fn toggle_vote(
        &mut self,
        view: &mut DiscussionView,
        ledger: &mut InteractionStateStore,
        reply_id: &ReplyId,
        pressed: VoteKind,
    ) -> Result<Option<VoteKind>, EngineError> {
        require_reply(view, reply_id)?;
        let current = ledger.vote(reply_id);
        let next = next_vote(current, pressed);
        self.submit(
            view,
            ledger,
            MutationKey::Vote(reply_id.clone()),
            Choice::Vote(current),
            Choice::Vote(next),
        );
        Ok(next)
    }

    pub fn toggle_reaction(
        &mut self,
        view: &mut DiscussionView,
        ledger: &mut InteractionStateStore,
        reply_id: &ReplyId,
        pressed: &ReactionKind,
    ) -> Result<Option<ReactionKind>, EngineError> {
        require_reply(view, reply_id)?;
        let current = ledger.reaction(reply_id).cloned();
        let next = next_reaction(current.as_ref(), pressed);
        self.submit(
            view,
            ledger,
            MutationKey::Reaction(reply_id.clone()),
            Choice::Reaction(current),
            Choice::Reaction(next.clone()),
        );
        Ok(next)
    }

    pub fn toggle_like(
        &mut self,
        view: &mut DiscussionView,
        ledger: &mut InteractionStateStore,
    ) -> Result<bool, EngineError> {
        if view.post.is_none() {
            return Err(EngineError::NotFound("post not loaded".to_string()));
        }
        let current = ledger.is_liked(&self.post_id);
        self.submit(
            view,
            ledger,
            MutationKey::Like(self.post_id.clone()),
            Choice::Flag(current),
            Choice::Flag(!current),
        );
        Ok(!current)
    }

    pub fn toggle_bookmark(
        &mut self,
        view: &mut DiscussionView,
        ledger: &mut InteractionStateStore,
    ) -> Result<bool, EngineError> {
        let current = ledger.is_bookmarked(&self.post_id);
        self.submit(
            view,
            ledger,
            MutationKey::Bookmark(self.post_id.clone()),
            Choice::Flag(current),
            Choice::Flag(!current),
        );
        Ok(!current)
    }

    /// Send an already-applied, authorized solution change through the same protocol
    pub fn set_solution(
        &mut self,
        view: &mut DiscussionView,
        ledger: &mut InteractionStateStore,
        change: &SolutionChange,
    ) {
        self.submit(
            view,
            ledger,
            MutationKey::Solution(change.reply_id.clone()),
            Choice::Flag(change.previous),
            Choice::Flag(change.desired),
        );
    }

    fn submit(
        &mut self,
        view: &mut DiscussionView,
        ledger: &mut InteractionStateStore,
        key: MutationKey,
        from: Choice,
        to: Choice,
    ) {
        if from == to && !self.slots.contains_key(&key) {
            return;
        }

        apply_local(view, ledger, &self.viewer.user_id, &key, &to);

        if let Some(slot) = self.slots.get_mut(&key) {
            if !slot.settled {
                tracing::debug!(key = ?key, "Coalescing toggle behind in-flight call");
                slot.desired = to;
                return;
            }
        }

        if from == to {
            return;
        }

        let ticket = self.take_ticket();
        self.slots.insert(
            key.clone(),
            PendingSlot {
                ticket,
                baseline: from.clone(),
                in_flight: to.clone(),
                desired: to.clone(),
                settled: false,
            },
        );
        self.dispatch(ticket, key, &from, &to);
    }

    fn take_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn dispatch(&self, ticket: u64, key: MutationKey, from: &Choice, to: &Choice) {
        let Some(call) = self.remote_call(&key, from, to) else {
            return;
        };

        tracing::debug!(ticket, key = ?key, "Dispatching remote mutation");

        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = call.execute(api.as_ref()).await;
            // The controller may be gone; nothing left to reconcile then.
            let _ = events.send(DiscussionEvent::MutationSettled {
                ticket,
                key,
                result,
            });
        });
    }

    fn remote_call(&self, key: &MutationKey, from: &Choice, to: &Choice) -> Option<RemoteCall> {
        let call = match (key, from, to) {
            (MutationKey::Vote(reply_id), Choice::Vote(from), Choice::Vote(to)) => {
                let kind = (*to).or(*from)?;
                RemoteCall::Vote(VoteRequest {
                    post_id: self.post_id.clone(),
                    reply_id: reply_id.clone(),
                    kind,
                    from: *from,
                    to: *to,
                })
            }
            (MutationKey::Reaction(reply_id), Choice::Reaction(from), Choice::Reaction(to)) => {
                RemoteCall::Reaction(ReactionRequest {
                    post_id: self.post_id.clone(),
                    reply_id: reply_id.clone(),
                    new_kind: to.clone(),
                    old_kind: from.clone(),
                })
            }
            (MutationKey::Solution(reply_id), _, Choice::Flag(desired)) => {
                RemoteCall::Solution(SolutionRequest {
                    post_id: self.post_id.clone(),
                    reply_id: reply_id.clone(),
                    desired: *desired,
                    caller_id: self.viewer.user_id.clone(),
                })
            }
            (MutationKey::Like(post_id), _, _) => RemoteCall::Like(post_id.clone()),
            (MutationKey::Bookmark(post_id), _, _) => RemoteCall::Bookmark(post_id.clone()),
            _ => return None,
        };
        Some(call)
    }

    /// Reconcile a remote response with local state
    pub fn settle(
        &mut self,
        view: &mut DiscussionView,
        ledger: &mut InteractionStateStore,
        ticket: u64,
        key: &MutationKey,
        result: Result<RemoteAck, RemoteError>,
    ) -> Settlement {
        let current = match self.slots.get(key) {
            Some(slot) if slot.ticket == ticket && !slot.settled => slot.clone(),
            _ => return Settlement::Stale,
        };
        let target_exists = key
            .reply_id()
            .is_none_or(|reply_id| view.forest.contains(reply_id));

        match result {
            Ok(ack) => {
                if !target_exists {
                    self.slots.remove(key);
                    tracing::debug!(key = ?key, "Response for a reply no longer in the thread");
                    return Settlement::Dropped;
                }

                let confirmed = match ack {
                    RemoteAck::Done => current.in_flight.clone(),
                    RemoteAck::Liked(liked) => Choice::Flag(liked),
                    RemoteAck::Bookmarked(bookmarked) => Choice::Flag(bookmarked),
                };

                if confirmed != current.desired {
                    let ticket = self.take_ticket();
                    let desired = current.desired.clone();
                    self.slots.insert(
                        key.clone(),
                        PendingSlot {
                            ticket,
                            baseline: confirmed.clone(),
                            in_flight: desired.clone(),
                            desired: desired.clone(),
                            settled: false,
                        },
                    );
                    self.dispatch(ticket, key.clone(), &confirmed, &desired);
                    return Settlement::FollowUp;
                }

                if key.domain().is_some() {
                    if let Some(slot) = self.slots.get_mut(key) {
                        slot.settled = true;
                    }
                } else {
                    self.slots.remove(key);
                }
                Settlement::Confirmed
            }
            Err(error) => {
                self.slots.remove(key);
                apply_local(view, ledger, &self.viewer.user_id, key, &current.baseline);

                if !target_exists || matches!(error, RemoteError::NotFound(_)) {
                    tracing::debug!(key = ?key, error = %error, "Reverted toggle on vanished target");
                    return Settlement::Dropped;
                }

                tracing::warn!(key = ?key, error = %error, "Remote mutation failed, rolled back");
                Settlement::RolledBack(EngineError::from(error))
            }
        }
    }

    /// Re-apply unconfirmed toggles after a snapshot replaced part of the view.
    ///
    /// Calls that already succeeded give way to the snapshot of their domain;
    /// calls still in flight keep the user's choice visible on top of it.
    pub fn rebase(&mut self, view: &mut DiscussionView, domain: SnapshotDomain) {
        self.slots
            .retain(|key, slot| !(slot.settled && key.domain() == Some(domain)));

        for (key, slot) in &self.slots {
            apply_to_view(view, &self.viewer.user_id, key, &slot.desired);
        }
    }
}

fn require_reply(view: &DiscussionView, reply_id: &ReplyId) -> Result<(), EngineError> {
    if view.forest.contains(reply_id) {
        Ok(())
    } else {
        Err(EngineError::NotFound(format!("reply {}", reply_id)))
    }
}

fn apply_local(
    view: &mut DiscussionView,
    ledger: &mut InteractionStateStore,
    user: &UserId,
    key: &MutationKey,
    choice: &Choice,
) {
    apply_to_view(view, user, key, choice);
    match (key, choice) {
        (MutationKey::Vote(reply_id), Choice::Vote(vote)) => ledger.set_vote(reply_id, *vote),
        (MutationKey::Reaction(reply_id), Choice::Reaction(reaction)) => {
            ledger.set_reaction(reply_id, reaction.clone())
        }
        (MutationKey::Like(post_id), Choice::Flag(liked)) => ledger.set_liked(post_id, *liked),
        (MutationKey::Bookmark(post_id), Choice::Flag(bookmarked)) => {
            ledger.set_bookmarked(post_id, *bookmarked)
        }
        _ => {}
    }
}

fn apply_to_view(view: &mut DiscussionView, user: &UserId, key: &MutationKey, choice: &Choice) {
    match (key, choice) {
        (MutationKey::Vote(reply_id), Choice::Vote(vote)) => {
            if let Some(reply) = view.forest.reply_mut(reply_id) {
                set_vote_membership(reply, user, *vote);
            }
        }
        (MutationKey::Reaction(reply_id), Choice::Reaction(reaction)) => {
            if let Some(reply) = view.forest.reply_mut(reply_id) {
                set_reaction_membership(reply, user, reaction.as_ref());
            }
        }
        (MutationKey::Solution(reply_id), Choice::Flag(desired)) => {
            apply_solution(view, reply_id, *desired);
        }
        (MutationKey::Like(_), Choice::Flag(liked)) => {
            if let Some(post) = view.post.as_mut() {
                set_like_membership(post, user, *liked);
            }
        }
        _ => {}
    }
}
