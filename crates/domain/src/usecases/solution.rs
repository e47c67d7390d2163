//! Solution propagation - marks replies as solutions and keeps the post in step

use std::sync::Arc;

use crate::error::EngineError;
use crate::model::{Post, ReplyId, Viewer};
use crate::usecases::view::DiscussionView;

/// Decides whether a viewer may mark solutions on a post
pub type SolutionAuthorizer = Arc<dyn Fn(&Viewer, &Post) -> bool + Send + Sync>;

/// Default rule: the post author or an administrator
pub fn author_or_admin() -> SolutionAuthorizer {
    Arc::new(|viewer: &Viewer, post: &Post| viewer.is_admin || post.is_author(&viewer.user_id))
}

/// A solution flag change that was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionChange {
    pub reply_id: ReplyId,
    pub previous: bool,
    pub desired: bool,
}

impl SolutionChange {
    pub fn is_noop(&self) -> bool {
        self.previous == self.desired
    }
}

pub struct SolutionPropagator {
    authorize: SolutionAuthorizer,
}

impl Default for SolutionPropagator {
    fn default() -> Self {
        Self::new(author_or_admin())
    }
}

impl SolutionPropagator {
    pub fn new(authorize: SolutionAuthorizer) -> Self {
        Self { authorize }
    }

    /// Check authorization and existence; nothing is modified.
    ///
    /// Returns the reply's current flag.
    pub fn check(
        &self,
        view: &DiscussionView,
        viewer: &Viewer,
        reply_id: &ReplyId,
    ) -> Result<bool, EngineError> {
        let post = view
            .post
            .as_ref()
            .ok_or_else(|| EngineError::NotFound("post not loaded".to_string()))?;

        if !(self.authorize)(viewer, post) {
            tracing::debug!(
                user_id = %viewer.user_id,
                post_id = %post.id,
                "Refusing solution change"
            );
            return Err(EngineError::Authorization(
                "only the post author or an administrator can mark solutions".to_string(),
            ));
        }

        let node = view
            .forest
            .get(reply_id)
            .ok_or_else(|| EngineError::NotFound(format!("reply {}", reply_id)))?;

        Ok(node.reply.is_solution)
    }

    /// Authorize, then set the flag on the reply and update the post
    pub fn mark_solution(
        &self,
        view: &mut DiscussionView,
        viewer: &Viewer,
        reply_id: &ReplyId,
        desired: bool,
    ) -> Result<SolutionChange, EngineError> {
        let previous = self.check(view, viewer, reply_id)?;
        apply_solution(view, reply_id, desired);
        Ok(SolutionChange {
            reply_id: reply_id.clone(),
            previous,
            desired,
        })
    }
}

/// Set one reply's flag and add/remove it from the post's solution list.
///
/// Other replies are left alone: a thread may have several solutions.
pub fn apply_solution(view: &mut DiscussionView, reply_id: &ReplyId, desired: bool) {
    if let Some(reply) = view.forest.reply_mut(reply_id) {
        reply.is_solution = desired;
    }

    if let Some(post) = view.post.as_mut() {
        let listed = post.solution_reply_ids.contains(reply_id);
        if desired && !listed {
            post.solution_reply_ids.push(reply_id.clone());
        } else if !desired && listed {
            post.solution_reply_ids.retain(|id| id != reply_id);
        }
    }
}
