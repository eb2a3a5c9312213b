//! Provider client trait definition
//!
//! Defines the interface every upstream provider implementation follows:
//! a descriptor for registry/metadata purposes, paginated record fetching,
//! and webhook payload parsing. Both polling and webhooks normalize into
//! `UpstreamRecord`s that feed the same idempotent upsert path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Provider error types, aligned with how a sync run terminates
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Upstream rejected the credentials (401/403); terminal until re-link
    #[error("upstream rejected credentials (status {status})")]
    Unauthorized { status: u16 },
    /// Upstream rate limited the caller (429), with its backoff hint
    #[error("upstream rate limited")]
    RateLimited { retry_after_secs: Option<u64> },
    /// Timeout, transport failure, 5xx, or an unexpected status
    #[error("transient upstream failure: {detail}")]
    Transient { detail: String },
    /// Response body that cannot be interpreted
    #[error("malformed upstream response: {detail}")]
    Malformed { detail: String },
}

/// Opaque pagination cursor as the provider defines it.
///
/// Wraps a JSON payload that must round-trip through the sync state without
/// alteration; providers may use numbers, strings, or structured objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(pub serde_json::Value);

impl PageCursor {
    /// Construct a cursor from any JSON value.
    pub fn from_json(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Convenience helper to build a string cursor.
    pub fn from_string<S: Into<String>>(value: S) -> Self {
        Self(serde_json::Value::String(value.into()))
    }

    /// Borrow the underlying JSON value.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Attempt to access the cursor as a string.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }
}

impl From<PageCursor> for serde_json::Value {
    fn from(cursor: PageCursor) -> Self {
        cursor.0
    }
}

impl From<serde_json::Value> for PageCursor {
    fn from(value: serde_json::Value) -> Self {
        PageCursor::from_json(value)
    }
}

/// One upstream record normalized for mirroring
#[derive(Debug, Clone)]
pub struct UpstreamRecord {
    /// Upstream's immutable identifier; empty ids fail record validation
    pub external_id: String,
    /// Record category ("video", "order", ...)
    pub kind: String,
    /// The record body as upstream sent it
    pub payload: serde_json::Value,
    /// True when upstream reports the record removed
    pub deleted: bool,
    /// When upstream last touched the record, if it says
    pub activity_at: Option<DateTime<Utc>>,
}

/// One fetched page of records
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<UpstreamRecord>,
    /// Cursor for the following page; `None` means the listing is exhausted
    pub next_cursor: Option<PageCursor>,
}

impl RecordPage {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parameters for fetching one page
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Cursor from the previous page; `None` requests the first page
    pub cursor: Option<PageCursor>,
    /// Upper bound on records per page
    pub page_size: u32,
    /// When the connection last completed a sync; incremental providers can
    /// use it to narrow the listing
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Static description of a registered provider
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderDescriptor {
    /// Stable identifier used as `provider_key` on connections
    pub key: String,
    /// Human-readable name
    pub display_name: String,
    /// Whether one owner may hold several connections to this provider
    pub allows_multiple: bool,
    /// Whether the provider pushes events to the webhook endpoint
    pub supports_webhooks: bool,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Static descriptor for this provider.
    fn descriptor(&self) -> ProviderDescriptor;

    /// Fetch one page of records from upstream.
    async fn fetch_page(
        &self,
        secret: &str,
        request: &FetchRequest,
    ) -> Result<RecordPage, ProviderError>;

    /// Parse a verified webhook body into records. Unrecognized event types
    /// yield an empty list rather than an error.
    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<UpstreamRecord>, ProviderError>;
}

/// Maps a non-success upstream status to the matching provider error.
pub(crate) fn error_for_status(
    status: reqwest::StatusCode,
    retry_after_secs: Option<u64>,
) -> ProviderError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return ProviderError::Unauthorized {
            status: status.as_u16(),
        };
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited { retry_after_secs };
    }
    ProviderError::Transient {
        detail: format!("upstream returned status {}", status.as_u16()),
    }
}

/// Extracts the `Retry-After` hint in seconds, when present and delta-coded.
pub(crate) fn retry_after_from(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Maps a transport-level failure to a transient provider error.
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transient {
        detail: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            format!("transport error: {}", err)
        },
    }
}
