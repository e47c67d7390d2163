//! Media upload pipeline
//!
//! `Idle -> Previewing -> Uploading -> Attached | Failed`. Selecting a file
//! creates a local preview and spawns the upload; progress and completion
//! come back as events tagged with the attempt they belong to, so anything
//! from a replaced or cancelled attempt is dropped.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::model::{AssetDescriptor, LocalFile};
use crate::policy::ReplyPolicy;
use crate::ports::{AssetUploader, UploadError, UploadProgress};
use crate::usecases::events::{DiscussionEvent, DiscussionUpdate};

/// Identifies one upload attempt
pub type AttemptId = u64;

/// Handle to a local, non-network preview of a selected file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewRef(String);

impl PreviewRef {
    fn generate() -> Self {
        Self(format!("preview:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreviewRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Idle,
    Previewing {
        preview: PreviewRef,
        file_name: String,
    },
    Uploading {
        preview: PreviewRef,
        progress: u8,
    },
    Attached {
        preview: PreviewRef,
        asset: AssetDescriptor,
    },
    Failed {
        error: UploadError,
    },
}

impl UploadState {
    pub fn phase(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Previewing { .. } => "previewing",
            UploadState::Uploading { .. } => "uploading",
            UploadState::Attached { .. } => "attached",
            UploadState::Failed { .. } => "failed",
        }
    }

    pub fn preview(&self) -> Option<&PreviewRef> {
        match self {
            UploadState::Previewing { preview, .. }
            | UploadState::Uploading { preview, .. }
            | UploadState::Attached { preview, .. } => Some(preview),
            UploadState::Idle | UploadState::Failed { .. } => None,
        }
    }

    /// Whether an upload is underway (preview shown, transfer not finished)
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UploadState::Previewing { .. } | UploadState::Uploading { .. }
        )
    }
}

/// Drives one attachment slot through the upload state machine
pub struct UploadPipeline<U: AssetUploader + ?Sized + 'static> {
    uploader: Arc<U>,
    policy: ReplyPolicy,
    events: UnboundedSender<DiscussionEvent>,
    state: UploadState,
    attempt: AttemptId,
    task: Option<JoinHandle<()>>,
    previews: HashSet<PreviewRef>,
}

impl<U: AssetUploader + ?Sized + 'static> UploadPipeline<U> {
    pub fn new(
        uploader: Arc<U>,
        policy: ReplyPolicy,
        events: UnboundedSender<DiscussionEvent>,
    ) -> Self {
        Self {
            uploader,
            policy,
            events,
            state: UploadState::Idle,
            attempt: 0,
            task: None,
            previews: HashSet::new(),
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Number of preview handles not yet revoked
    pub fn live_previews(&self) -> usize {
        self.previews.len()
    }

    /// Select a file, replacing whatever attempt came before it.
    ///
    /// The file is validated first; a rejected file leaves the current
    /// attempt untouched.
    pub fn select_file(&mut self, file: LocalFile) -> Result<PreviewRef, ValidationError> {
        let kind = self.policy.validate_file(&file)?;

        self.discard_attempt();
        self.attempt += 1;
        let attempt = self.attempt;

        let preview = PreviewRef::generate();
        self.previews.insert(preview.clone());
        self.state = UploadState::Previewing {
            preview: preview.clone(),
            file_name: file.name.clone(),
        };

        tracing::info!(
            attempt,
            file = %file.name,
            kind = ?kind,
            bytes = file.size(),
            "Starting media upload"
        );

        let uploader = Arc::clone(&self.uploader);
        let events = self.events.clone();
        self.task = Some(tokio::spawn(async move {
            let _ = events.send(DiscussionEvent::UploadStarted { attempt });

            let sink = events.clone();
            let progress = UploadProgress::new(move |percent| {
                let _ = sink.send(DiscussionEvent::UploadProgress { attempt, percent });
            });

            let result = uploader.upload_asset(&file, &progress).await;
            let _ = events.send(DiscussionEvent::UploadFinished { attempt, result });
        }));

        Ok(preview)
    }

    pub fn on_started(&mut self, attempt: AttemptId) -> DiscussionUpdate {
        if attempt != self.attempt {
            return DiscussionUpdate::Ignored;
        }
        match &self.state {
            UploadState::Previewing { preview, .. } => {
                self.state = UploadState::Uploading {
                    preview: preview.clone(),
                    progress: 0,
                };
                DiscussionUpdate::UploadStarted
            }
            _ => DiscussionUpdate::Ignored,
        }
    }

    pub fn on_progress(&mut self, attempt: AttemptId, percent: u8) -> DiscussionUpdate {
        if attempt != self.attempt {
            return DiscussionUpdate::Ignored;
        }
        let (preview, previous) = match &self.state {
            UploadState::Previewing { preview, .. } => (preview.clone(), 0),
            UploadState::Uploading { preview, progress } => (preview.clone(), *progress),
            _ => return DiscussionUpdate::Ignored,
        };
        let progress = percent.min(100).max(previous);
        self.state = UploadState::Uploading { preview, progress };
        DiscussionUpdate::UploadProgress(progress)
    }

    pub fn on_finished(
        &mut self,
        attempt: AttemptId,
        result: Result<AssetDescriptor, UploadError>,
    ) -> DiscussionUpdate {
        if attempt != self.attempt || !self.state.is_busy() {
            return DiscussionUpdate::Ignored;
        }
        self.task = None;

        match result {
            Ok(asset) => {
                let Some(preview) = self.state.preview().cloned() else {
                    return DiscussionUpdate::Ignored;
                };
                tracing::info!(attempt, asset_id = %asset.id, "Media upload attached");
                self.state = UploadState::Attached {
                    preview,
                    asset: asset.clone(),
                };
                DiscussionUpdate::UploadAttached(asset)
            }
            Err(error) => {
                tracing::warn!(attempt, error = %error, "Media upload failed");
                self.revoke_preview();
                self.state = UploadState::Failed {
                    error: error.clone(),
                };
                DiscussionUpdate::UploadFailed(error)
            }
        }
    }

    /// Stop the current attempt and return to `Idle`
    pub fn cancel(&mut self) {
        if self.state.is_busy() {
            tracing::info!(attempt = self.attempt, "Media upload cancelled");
        }
        self.clear();
    }

    /// Forget the current attempt in any state, releasing its resources
    pub fn clear(&mut self) {
        self.discard_attempt();
        self.attempt += 1;
        self.state = UploadState::Idle;
    }

    /// Assets that may ride along with a reply submission right now
    pub fn attachments_for_submit(&self) -> Result<Vec<AssetDescriptor>, ValidationError> {
        match &self.state {
            UploadState::Idle => Ok(Vec::new()),
            UploadState::Attached { asset, .. } => Ok(vec![asset.clone()]),
            UploadState::Previewing { .. } | UploadState::Uploading { .. } => {
                Err(ValidationError::UploadInProgress)
            }
            UploadState::Failed { .. } => Err(ValidationError::AttachmentFailed),
        }
    }

    fn discard_attempt(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.revoke_preview();
    }

    fn revoke_preview(&mut self) {
        if let Some(preview) = self.state.preview() {
            self.previews.remove(preview);
            tracing::debug!(preview = %preview, "Revoked local preview");
        }
    }
}

impl<U: AssetUploader + ?Sized + 'static> Drop for UploadPipeline<U> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
