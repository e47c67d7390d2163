//! Stub uploader for testing and offline mode

use async_trait::async_trait;
use std::time::Duration;
use threadline_domain::{AssetDescriptor, AssetId, AssetUploader, LocalFile, UploadError, UploadProgress};
use uuid::Uuid;

/// Uploader that "hosts" files locally, stepping progress in fixed increments
pub struct StubUploader {
    base_url: String,
    step_delay: Duration,
    error: Option<UploadError>,
}

impl StubUploader {
    pub fn new() -> Self {
        Self {
            base_url: "memory://assets".to_string(),
            step_delay: Duration::ZERO,
            error: None,
        }
    }

    /// Pause between progress steps
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Fail every upload halfway through with `error`
    pub fn with_error(error: UploadError) -> Self {
        Self {
            error: Some(error),
            ..Self::new()
        }
    }
}

impl Default for StubUploader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetUploader for StubUploader {
    async fn upload_asset(
        &self,
        file: &LocalFile,
        progress: &UploadProgress,
    ) -> Result<AssetDescriptor, UploadError> {
        let kind = file
            .kind()
            .ok_or_else(|| UploadError::InvalidRequest(format!("unsupported type {}", file.content_type)))?;

        for percent in [25u8, 50, 75, 100] {
            if percent > 50 {
                if let Some(error) = &self.error {
                    return Err(error.clone());
                }
            }
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            progress.report(percent);
        }

        let id = AssetId::new(Uuid::new_v4().to_string());
        Ok(AssetDescriptor {
            url: format!("{}/{}/{}", self.base_url, id, file.name),
            id,
            kind,
            byte_size: file.size(),
            thumbnail_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use threadline_domain::AssetKind;

    #[tokio::test]
    async fn test_stub_reports_progress_and_descriptor() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = UploadProgress::new(move |p| sink.lock().unwrap().push(p));
        let file = LocalFile::new("clip.mp4", "video/mp4", vec![0; 16]);

        let asset = StubUploader::new().upload_asset(&file, &progress).await.unwrap();

        assert_eq!(asset.kind, AssetKind::Video);
        assert_eq!(asset.byte_size, 16);
        assert!(asset.url.ends_with("/clip.mp4"));
        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_stub_error_midway() {
        let progress = UploadProgress::noop();
        let file = LocalFile::new("a.png", "image/png", vec![1]);

        let result = StubUploader::with_error(UploadError::Server("disk full".to_string()))
            .upload_asset(&file, &progress)
            .await;

        assert!(matches!(result, Err(UploadError::Server(_))));
        assert_eq!(progress.last(), 50);
    }
}
