//! Boundary contracts with the surrounding application and their HTTP
//! implementations.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::error::SyncError;
use crate::models::{LessonContent, QueuedSyncItem, SyncKind};
use crate::utils::retry::{retry_when, RetryConfig};

/// Given a lesson id, returns its immutable content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_lesson(&self, lesson_id: &str) -> Result<LessonContent>;
}

/// Count of prior attempts a student made at a lesson.
#[async_trait]
pub trait AttemptCounter: Send + Sync {
    async fn prior_attempts(&self, student_id: &str, lesson_id: &str) -> Result<u32>;
}

/// Accepts one queued item at a time. Redelivery of an applied item must be harmless.
#[async_trait]
pub trait SyncSink: Send + Sync {
    async fn send(&self, item: &QueuedSyncItem) -> Result<(), SyncError>;
}

#[derive(Debug, Deserialize)]
struct AttemptCountResponse {
    count: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("Content API returned error {status}: {body}")]
struct ApiStatusError {
    status: StatusCode,
    body: String,
}

/// Timeouts, refused connections, 5xx and 429 are worth another try;
/// anything else (404, malformed body) will fail the same way again.
fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(api) = err.downcast_ref::<ApiStatusError>() {
        return api.status.is_server_error() || api.status == StatusCode::TOO_MANY_REQUESTS;
    }
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        None => false,
    }
}

pub struct HttpRemote {
    http_client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn sync_url(&self, kind: SyncKind) -> String {
        match kind {
            SyncKind::Response => format!("{}/sync/responses", self.base_url),
            SyncKind::AttemptUpdate => format!("{}/sync/attempts", self.base_url),
        }
    }

    async fn get_lesson_once(&self, url: &str) -> Result<LessonContent> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to call content API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiStatusError {
                status,
                body: error_text,
            }
            .into());
        }

        response
            .json()
            .await
            .context("Failed to parse lesson content")
    }
}

#[async_trait]
impl ContentSource for HttpRemote {
    async fn fetch_lesson(&self, lesson_id: &str) -> Result<LessonContent> {
        let url = format!("{}/lessons/{}", self.base_url, lesson_id);
        tracing::debug!("Fetching lesson content from {}", url);

        let lesson = retry_when(&self.retry, is_transient, || self.get_lesson_once(&url)).await?;

        tracing::info!(
            "Fetched lesson {} ({} levels)",
            lesson_id,
            lesson.level_count()
        );
        Ok(lesson)
    }
}

#[async_trait]
impl AttemptCounter for HttpRemote {
    async fn prior_attempts(&self, student_id: &str, lesson_id: &str) -> Result<u32> {
        let url = format!("{}/lessons/{}/attempts/count", self.base_url, lesson_id);

        let response = self
            .http_client
            .get(&url)
            .query(&[("student_id", student_id)])
            .send()
            .await
            .context("Failed to call attempt count API")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Attempt count API returned error {}",
                response.status()
            ));
        }

        let body: AttemptCountResponse = response
            .json()
            .await
            .context("Failed to parse attempt count")?;
        Ok(body.count)
    }
}

#[async_trait]
impl SyncSink for HttpRemote {
    async fn send(&self, item: &QueuedSyncItem) -> Result<(), SyncError> {
        let response = self
            .http_client
            .post(self.sync_url(item.kind))
            .header("Idempotency-Key", &item.id)
            .json(item)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Remote acknowledged sync item {}", item.id);
            Ok(())
        } else {
            Err(SyncError::Rejected {
                item_id: item.id.clone(),
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retried() {
        let unavailable: anyhow::Error = ApiStatusError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }
        .into();
        let missing: anyhow::Error = ApiStatusError {
            status: StatusCode::NOT_FOUND,
            body: "no such lesson".into(),
        }
        .into();

        assert!(is_transient(&unavailable));
        assert!(is_transient(&unavailable.context("Failed to fetch lesson")));
        assert!(!is_transient(&missing));
        assert!(!is_transient(&anyhow!("unexpected payload")));
    }

    #[test]
    fn sync_urls_are_routed_by_kind() {
        let remote = HttpRemote::new("http://sync.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            remote.sync_url(SyncKind::Response),
            "http://sync.local/sync/responses"
        );
        assert_eq!(
            remote.sync_url(SyncKind::AttemptUpdate),
            "http://sync.local/sync/attempts"
        );
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_transport_error() {
        let remote = HttpRemote::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let item = QueuedSyncItem {
            id: "item-1".into(),
            kind: SyncKind::Response,
            payload: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        };

        let result = remote.send(&item).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }
}
