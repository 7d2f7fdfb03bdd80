pub mod error;
pub mod types;

pub use error::{FeedError, Result};
pub use types::{
    MessageQuery, PollAnswer, RemoteAttachment, RemoteAuthor, RemoteMessage, RemoteReaction,
    SourceDescriptor,
};

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::Serialize;

use types::{BatchMessages, MessagePage};

/// Wait assumed when the server rate-limits without a Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Client for the message-feed bridge API.
///
/// The bridge fronts the upstream messaging platform and speaks plain JSON:
/// cursor-based ascending pagination, explicit 429 + Retry-After for rate
/// limits, 401/403 for revoked access, 404 for dangling references.
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct BatchGetRequest<'a> {
    ids: &'a [i64],
}

impl FeedClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Resolve a channel identifier (numeric id or @handle) to its descriptor.
    pub async fn resolve(&self, identifier: &str) -> Result<SourceDescriptor> {
        let url = format!("{}/sources/{}", self.base_url, identifier);
        let resp = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let resp = check_status(resp, identifier).await?;
        Ok(resp.json().await?)
    }

    /// Fetch one ascending page of top-level messages for a source.
    ///
    /// With `min_id` set, the page holds only messages with strictly greater
    /// ids; with `offset_date`, messages at or after that instant. Capped at
    /// `query.limit`, oldest first.
    pub async fn messages(&self, source_id: i64, query: &MessageQuery) -> Result<Vec<RemoteMessage>> {
        let url = format!("{}/sources/{}/messages", self.base_url, source_id);
        tracing::debug!(source_id, min_id = ?query.min_id, limit = query.limit, "Fetching messages");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let resp = check_status(resp, &source_id.to_string()).await?;
        let page: MessagePage = resp.json().await?;
        Ok(page.messages)
    }

    /// Fetch replies threaded under one parent message, oldest first.
    pub async fn replies(
        &self,
        source_id: i64,
        parent_id: i64,
        limit: u32,
    ) -> Result<Vec<RemoteMessage>> {
        let url = format!(
            "{}/sources/{}/messages/{}/replies",
            self.base_url, source_id, parent_id
        );
        tracing::debug!(source_id, parent_id, limit, "Fetching replies");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("limit", limit)])
            .send()
            .await?;
        let resp = check_status(resp, &format!("{source_id}/{parent_id}")).await?;
        let page: MessagePage = resp.json().await?;
        Ok(page.messages)
    }

    /// Batch-fetch current remote state for known message ids. Ids the remote
    /// no longer has come back as None, in input order.
    pub async fn messages_by_ids(
        &self,
        source_id: i64,
        ids: &[i64],
    ) -> Result<Vec<Option<RemoteMessage>>> {
        let url = format!("{}/sources/{}/messages:batchGet", self.base_url, source_id);
        tracing::debug!(source_id, count = ids.len(), "Batch-fetching messages by id");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&BatchGetRequest { ids })
            .send()
            .await?;
        let resp = check_status(resp, &source_id.to_string()).await?;
        let batch: BatchMessages = resp.json().await?;
        Ok(batch.messages)
    }
}

/// Map HTTP status onto the feed error taxonomy.
async fn check_status(resp: Response, subject: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            Err(FeedError::RateLimited { retry_after })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(FeedError::AccessDenied(subject.to_string()))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(FeedError::NotFound(subject.to_string())),
        _ => {
            let message = resp.text().await.unwrap_or_default();
            Err(FeedError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}
