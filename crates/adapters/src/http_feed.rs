//! Polling feed over HTTP
//!
//! Turns plain GET endpoints into full-snapshot subscriptions. Each poll sends
//! `If-None-Match` with the last ETag; a 304 or a body whose content digest
//! matches the last delivered snapshot produces nothing.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use threadline_domain::{
    DiscussionFeed, FeedError, Post, PostId, Reply, ReplySnapshot, SnapshotStream,
    compute_snapshot_digest,
};

/// HTTP polling implementation of [`DiscussionFeed`]
pub struct HttpPollingFeed {
    client: Client,
    token: Option<SecretString>,
    base_url: String,
    interval: Duration,
}

impl HttpPollingFeed {
    pub fn new(base_url: String, token: Option<SecretString>, interval: Duration) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            interval,
        }
    }

    fn poller(&self, url: String) -> Poller {
        Poller {
            client: self.client.clone(),
            token: self.token.clone(),
            url,
            interval: self.interval,
            etag: None,
        }
    }
}

enum PollError {
    /// The resource is gone or access was revoked; the stream ends
    Fatal(FeedError),
    /// Worth retrying on the next tick
    Transient(String),
}

struct Poller {
    client: Client,
    token: Option<SecretString>,
    url: String,
    interval: Duration,
    etag: Option<String>,
}

impl Poller {
    /// Fetch the resource; `Ok(None)` when the server reports it unchanged
    async fn fetch<T: DeserializeOwned>(&mut self) -> Result<Option<T>, PollError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            );
        }
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PollError::Transient(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => return Ok(None),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(PollError::Fatal(FeedError::NotFound(self.url.clone())));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PollError::Fatal(FeedError::Auth(format!(
                    "{} returned {}",
                    self.url,
                    response.status()
                ))));
            }
            status if !status.is_success() => {
                return Err(PollError::Transient(format!("{} returned {}", self.url, status)));
            }
            _ => {}
        }

        self.etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .json::<T>()
            .await
            .map_err(|e| PollError::Transient(format!("Invalid body: {}", e)))?;
        Ok(Some(body))
    }

    /// Wait one interval, then fetch; transient failures are logged and retried
    async fn next_change<T: DeserializeOwned>(&mut self) -> Option<T> {
        loop {
            tokio::time::sleep(self.interval).await;
            match self.fetch::<T>().await {
                Ok(Some(body)) => return Some(body),
                Ok(None) => continue,
                Err(PollError::Transient(e)) => {
                    tracing::warn!(url = %self.url, error = %e, "Feed poll failed, retrying");
                }
                Err(PollError::Fatal(e)) => {
                    tracing::warn!(url = %self.url, error = %e, "Feed poll ended");
                    return None;
                }
            }
        }
    }
}

/// First fetch of a subscription; any failure is a connect failure
async fn connect<T: DeserializeOwned>(poller: &mut Poller) -> Result<T, FeedError> {
    match poller.fetch::<T>().await {
        Ok(Some(body)) => Ok(body),
        Ok(None) => Err(FeedError::Connect(format!(
            "{} answered 304 without a cached copy",
            poller.url
        ))),
        Err(PollError::Fatal(e)) => Err(e),
        Err(PollError::Transient(e)) => Err(FeedError::Connect(e)),
    }
}

struct ReplyPoll {
    poller: Poller,
    post_id: PostId,
    digest: String,
    version: u64,
}

#[async_trait]
impl DiscussionFeed for HttpPollingFeed {
    async fn subscribe_replies(
        &self,
        post_id: &PostId,
    ) -> Result<SnapshotStream<ReplySnapshot>, FeedError> {
        let mut poller = self.poller(format!("{}/posts/{}/replies", self.base_url, post_id));
        let replies: Vec<Reply> = connect(&mut poller).await?;

        let digest = compute_snapshot_digest(&replies);
        let first = ReplySnapshot {
            post_id: post_id.clone(),
            version: 1,
            replies,
        };
        tracing::debug!(post_id = %post_id, count = first.replies.len(), "Reply feed connected");

        let state = ReplyPoll {
            poller,
            post_id: post_id.clone(),
            digest,
            version: 1,
        };
        let rest = stream::unfold(state, |mut state| async move {
            loop {
                let replies: Vec<Reply> = state.poller.next_change().await?;
                let digest = compute_snapshot_digest(&replies);
                if digest == state.digest {
                    continue;
                }
                state.digest = digest;
                state.version += 1;
                let snapshot = ReplySnapshot {
                    post_id: state.post_id.clone(),
                    version: state.version,
                    replies,
                };
                return Some((snapshot, state));
            }
        });

        Ok(stream::iter([first]).chain(rest).boxed())
    }

    async fn subscribe_post(&self, post_id: &PostId) -> Result<SnapshotStream<Post>, FeedError> {
        let mut poller = self.poller(format!("{}/posts/{}", self.base_url, post_id));
        let first: Post = connect(&mut poller).await?;

        let rest = stream::unfold((poller, first.clone()), |(mut poller, last)| async move {
            loop {
                let post: Post = poller.next_change().await?;
                if post != last {
                    return Some((post.clone(), (poller, post)));
                }
            }
        });

        Ok(stream::iter([first]).chain(rest).boxed())
    }
}
