//! Vimeo provider client
//!
//! Mirrors the authenticated user's video library. Listing is page-number
//! based (`GET /me/videos?page=N`), so the pagination cursor is a JSON
//! object `{"page": N}`. Webhook events carry the affected video resource
//! inline and may mark it deleted.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::time::Duration;

use super::client::{
    FetchRequest, PageCursor, ProviderClient, ProviderDescriptor, ProviderError, RecordPage,
    UpstreamRecord, error_for_status, retry_after_from, transport_error,
};
use async_trait::async_trait;

pub const PROVIDER_KEY: &str = "vimeo";
const DEFAULT_BASE_URL: &str = "https://api.vimeo.com";
const RECORD_KIND: &str = "video";
const ACCEPT_HEADER: &str = "application/vnd.vimeo.*+json;version=3.4";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct VimeoClient {
    http: reqwest::Client,
    base_url: String,
}

impl VimeoClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom API base, used by tests and
    /// self-hosted gateways.
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for VimeoClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalizes one video resource. The full resource body is mirrored as the
/// payload; the external id is the trailing segment of the `uri` field
/// (`/videos/12345` -> `12345`). Resources without a usable uri produce an
/// empty id and fail record validation downstream.
fn video_record(video: &Value) -> UpstreamRecord {
    let external_id = video
        .get("uri")
        .and_then(Value::as_str)
        .and_then(|uri| uri.rsplit('/').next())
        .unwrap_or_default()
        .to_string();
    let activity_at = video
        .get("modified_time")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc));
    UpstreamRecord {
        external_id,
        kind: RECORD_KIND.to_string(),
        payload: video.clone(),
        deleted: false,
        activity_at,
    }
}

#[async_trait]
impl ProviderClient for VimeoClient {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            key: PROVIDER_KEY.to_string(),
            display_name: "Vimeo".to_string(),
            allows_multiple: false,
            supports_webhooks: true,
        }
    }

    async fn fetch_page(
        &self,
        secret: &str,
        request: &FetchRequest,
    ) -> Result<RecordPage, ProviderError> {
        // Cursors round-trip through local storage; anything unreadable
        // restarts the listing from page one.
        let page = request
            .cursor
            .as_ref()
            .and_then(|cursor| cursor.as_json().get("page"))
            .and_then(Value::as_u64)
            .unwrap_or(1);

        let response = self
            .http
            .get(format!("{}/me/videos", self.base_url))
            .query(&[
                ("page", page.to_string()),
                ("per_page", request.page_size.to_string()),
            ])
            .header("authorization", format!("Bearer {}", secret))
            .header("accept", ACCEPT_HEADER)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_from(response.headers());
            return Err(error_for_status(status, retry_after));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed {
                detail: format!("invalid JSON body: {}", err),
            })?;

        let items = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed {
                detail: "response is missing the data array".to_string(),
            })?;

        let records = items.iter().map(video_record).collect();
        let has_next = body
            .pointer("/paging/next")
            .map(|next| !next.is_null())
            .unwrap_or(false);
        let next_cursor = has_next.then(|| PageCursor::from_json(json!({ "page": page + 1 })));

        Ok(RecordPage {
            records,
            next_cursor,
        })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<UpstreamRecord>, ProviderError> {
        let event: Value = serde_json::from_slice(body).map_err(|err| ProviderError::Malformed {
            detail: format!("invalid JSON body: {}", err),
        })?;
        let event_type = event
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed {
                detail: "event field missing".to_string(),
            })?;
        let deleted = match event_type {
            "video.deleted" => true,
            "video.created" | "video.updated" => false,
            // Unknown event types are skipped so new upstream events never
            // break ingestion.
            _ => return Ok(Vec::new()),
        };
        let video = event.get("video").ok_or_else(|| ProviderError::Malformed {
            detail: "video field missing".to_string(),
        })?;
        let mut record = video_record(video);
        record.deleted = deleted;
        Ok(vec![record])
    }
}
