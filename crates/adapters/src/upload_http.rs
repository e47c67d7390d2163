//! Streaming HTTP uploader for the file-hosting service

use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use threadline_domain::{AssetDescriptor, AssetUploader, LocalFile, UploadError, UploadProgress};
use tokio::sync::watch;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Uploads a file as a streamed request body, reporting progress per chunk
pub struct HttpAssetUploader {
    client: Client,
    token: Option<SecretString>,
    base_url: String,
    chunk_size: usize,
}

impl HttpAssetUploader {
    pub fn new(base_url: String, token: Option<SecretString>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

fn map_status(status: StatusCode, body: String) -> UploadError {
    match status.as_u16() {
        499 => UploadError::Aborted,
        400 | 411 | 413 | 415 | 422 => UploadError::InvalidRequest(body),
        401 | 403 => UploadError::InvalidRequest(format!("not authorized: {}", body)),
        _ => UploadError::Server(format!("{}: {}", status, body)),
    }
}

#[async_trait]
impl AssetUploader for HttpAssetUploader {
    async fn upload_asset(
        &self,
        file: &LocalFile,
        progress: &UploadProgress,
    ) -> Result<AssetDescriptor, UploadError> {
        let total = file.size();
        let chunks: Vec<Vec<u8>> = file
            .bytes
            .chunks(self.chunk_size)
            .map(<[u8]>::to_vec)
            .collect();

        let (sent_tx, mut sent_rx) = watch::channel(0u64);
        let body = stream::iter(chunks).map(move |chunk| {
            sent_tx.send_modify(|sent| *sent += chunk.len() as u64);
            Ok::<_, std::io::Error>(chunk)
        });

        let mut request = self
            .client
            .post(format!("{}/assets", self.base_url))
            .header(CONTENT_TYPE, file.content_type.as_str())
            .header("X-File-Name", file.name.as_str())
            .header("Content-Length", total)
            .body(Body::wrap_stream(body));
        if let Some(token) = &self.token {
            request = request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let send = request.send();
        tokio::pin!(send);

        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                changed = sent_rx.changed() => {
                    if changed.is_err() {
                        // Body fully handed over; only the response is left
                        break (&mut send).await;
                    }
                    let sent = *sent_rx.borrow_and_update();
                    progress.report_bytes(sent, total);
                }
            }
        };

        let response = result.map_err(|e| UploadError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, file = %file.name, "Asset upload rejected");
            return Err(map_status(status, body));
        }

        let asset: AssetDescriptor = response
            .json()
            .await
            .map_err(|e| UploadError::Server(format!("Invalid response: {}", e)))?;

        progress.report(100);
        tracing::debug!(asset_id = %asset.id, bytes = total, "Asset uploaded");
        Ok(asset)
    }
}
