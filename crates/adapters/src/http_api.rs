//! REST client for the discussion mutation surface

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use threadline_domain::{
    BookmarkOutcome, DiscussionApi, LikeOutcome, NewReply, PostId, ReactionKind,
    ReactionRequest, RemoteError, ReplyId, SolutionRequest, UserId, VoteKind, VoteRequest,
};

/// HTTP implementation of [`DiscussionApi`]
pub struct HttpDiscussionApi {
    client: Client,
    token: Option<SecretString>,
    base_url: String,
}

impl HttpDiscussionApi {
    pub fn new(base_url: String, token: Option<SecretString>) -> Self {
        Self::with_timeout(base_url, token, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: String, token: Option<SecretString>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn post_url(&self, post_id: &PostId) -> String {
        format!("{}/posts/{}", self.base_url, post_id)
    }

    fn reply_url(&self, post_id: &PostId, reply_id: &ReplyId) -> String {
        format!("{}/replies/{}", self.post_url(post_id), reply_id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = %status, body = %body, "Discussion API request failed");

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(body),
            StatusCode::NOT_FOUND | StatusCode::GONE => RemoteError::NotFound(body),
            StatusCode::BAD_REQUEST
            | StatusCode::CONFLICT
            | StatusCode::UNPROCESSABLE_ENTITY
            | StatusCode::PAYLOAD_TOO_LARGE => RemoteError::Rejected(body),
            _ => RemoteError::Server(format!("{}: {}", status, body)),
        })
    }
}

#[derive(Serialize)]
struct VoteBody {
    kind: VoteKind,
    from: Option<VoteKind>,
    to: Option<VoteKind>,
}

#[derive(Serialize)]
struct ReactionBody<'a> {
    new_kind: Option<&'a ReactionKind>,
    old_kind: Option<&'a ReactionKind>,
}

#[derive(Serialize)]
struct SolutionBody<'a> {
    desired: bool,
    caller_id: &'a UserId,
}

#[derive(Deserialize)]
struct CreatedReply {
    id: ReplyId,
}

#[async_trait]
impl DiscussionApi for HttpDiscussionApi {
    async fn submit_reply(&self, reply: &NewReply) -> Result<ReplyId, RemoteError> {
        let url = format!("{}/replies", self.post_url(&reply.post_id));
        let response = self.send(self.client.post(&url).json(reply)).await?;

        let created: CreatedReply = response
            .json()
            .await
            .map_err(|e| RemoteError::Server(format!("Invalid response: {}", e)))?;

        tracing::debug!(post_id = %reply.post_id, reply_id = %created.id, "Reply created");
        Ok(created.id)
    }

    async fn cast_vote(&self, request: &VoteRequest) -> Result<(), RemoteError> {
        let url = format!("{}/vote", self.reply_url(&request.post_id, &request.reply_id));
        let body = VoteBody {
            kind: request.kind,
            from: request.from,
            to: request.to,
        };
        self.send(self.client.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn cast_reaction(&self, request: &ReactionRequest) -> Result<(), RemoteError> {
        let url = format!(
            "{}/reaction",
            self.reply_url(&request.post_id, &request.reply_id)
        );
        let body = ReactionBody {
            new_kind: request.new_kind.as_ref(),
            old_kind: request.old_kind.as_ref(),
        };
        self.send(self.client.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn set_solution(&self, request: &SolutionRequest) -> Result<(), RemoteError> {
        let url = format!(
            "{}/solution",
            self.reply_url(&request.post_id, &request.reply_id)
        );
        let body = SolutionBody {
            desired: request.desired,
            caller_id: &request.caller_id,
        };
        self.send(self.client.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn toggle_like(&self, post_id: &PostId) -> Result<LikeOutcome, RemoteError> {
        let url = format!("{}/like", self.post_url(post_id));
        let response = self.send(self.client.post(&url)).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Server(format!("Invalid response: {}", e)))
    }

    async fn toggle_bookmark(&self, post_id: &PostId) -> Result<BookmarkOutcome, RemoteError> {
        let url = format!("{}/bookmark", self.post_url(post_id));
        let response = self.send(self.client.post(&url)).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Server(format!("Invalid response: {}", e)))
    }

    async fn delete_reply(&self, post_id: &PostId, reply_id: &ReplyId) -> Result<(), RemoteError> {
        let url = self.reply_url(post_id, reply_id);
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> HttpDiscussionApi {
        HttpDiscussionApi::new(
            server.uri(),
            Some(SecretString::new("test-token".into())),
        )
    }

    #[tokio::test]
    async fn test_submit_reply_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/posts/p1/replies"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_json(serde_json::json!({
                "post_id": "p1",
                "parent_reply_id": "r1",
                "body": "thanks @alice",
                "media": [],
                "mentions": ["alice"]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "r2"
            })))
            .mount(&mock_server)
            .await;

        let reply = NewReply {
            post_id: PostId::from("p1"),
            parent_reply_id: Some(ReplyId::from("r1")),
            body: "thanks @alice".to_string(),
            media: vec![],
            mentions: vec![UserId::from("alice")],
        };

        let id = api(&mock_server).submit_reply(&reply).await.unwrap();
        assert_eq!(id, ReplyId::from("r2"));
    }

    #[tokio::test]
    async fn test_vote_carries_transition() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/posts/p1/replies/r1/vote"))
            .and(body_json(serde_json::json!({
                "kind": "down",
                "from": "up",
                "to": "down"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = VoteRequest {
            post_id: PostId::from("p1"),
            reply_id: ReplyId::from("r1"),
            kind: VoteKind::Down,
            from: Some(VoteKind::Up),
            to: Some(VoteKind::Down),
        };

        api(&mock_server).cast_vote(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_reaction_clear_sends_null() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/posts/p1/replies/r1/reaction"))
            .and(body_json(serde_json::json!({
                "new_kind": null,
                "old_kind": "heart"
            })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let request = ReactionRequest {
            post_id: PostId::from("p1"),
            reply_id: ReplyId::from("r1"),
            new_kind: None,
            old_kind: Some(ReactionKind::from("heart")),
        };

        api(&mock_server).cast_reaction(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_like_outcome_parsed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/posts/p1/like"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "liked": true,
                "message": "Post liked"
            })))
            .mount(&mock_server)
            .await;

        let outcome = api(&mock_server).toggle_like(&PostId::from("p1")).await.unwrap();
        assert!(outcome.liked);
        assert_eq!(outcome.message, "Post liked");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/posts/p1/replies/gone/solution"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such reply"))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/posts/p1/replies/r1/solution"))
            .respond_with(ResponseTemplate::new(403).set_body_string("not the author"))
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/posts/p1/replies/r1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let api = api(&mock_server);
        let solution = |reply: &str| SolutionRequest {
            post_id: PostId::from("p1"),
            reply_id: ReplyId::from(reply),
            desired: true,
            caller_id: UserId::from("me"),
        };

        assert!(matches!(
            api.set_solution(&solution("gone")).await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(
            api.set_solution(&solution("r1")).await,
            Err(RemoteError::Unauthorized(_))
        ));
        assert!(matches!(
            api.delete_reply(&PostId::from("p1"), &ReplyId::from("r1"))
                .await,
            Err(RemoteError::Server(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let api = HttpDiscussionApi::with_timeout(
            "http://127.0.0.1:9".to_string(),
            None,
            Duration::from_secs(2),
        );
        let result = api.toggle_bookmark(&PostId::from("p1")).await;
        assert!(matches!(result, Err(RemoteError::Network(_))));
    }
}
