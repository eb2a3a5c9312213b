//! # List Pagination Cursors
//!
//! Keyset cursors for the list endpoints. A cursor names the last row of the
//! previous page by its ordering key (timestamp plus row id) and travels as an
//! opaque base64 token, validated here before any of it reaches a query.

use crate::error::ApiError;
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest accepted encoded token; anything larger is rejected unread.
const MAX_TOKEN_CHARS: usize = 512;
/// Cap on the decoded payload. A genuine cursor is well under 100 bytes.
const MAX_PAYLOAD_BYTES: usize = 256;

/// Keyset position within a `(timestamp, id)`-ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor {
    pub key_at: DateTime<Utc>,
    pub id: Uuid,
}

impl ListCursor {
    pub fn new(key_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { key_at, id }
    }

    /// Serialize to the opaque token handed to clients.
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        BASE64.encode(json.as_bytes())
    }

    /// Parse and validate a client-supplied token.
    pub fn decode(token: &str) -> Result<Self, ApiError> {
        if token.is_empty() {
            return Err(bad_cursor("cursor cannot be empty"));
        }
        if token.len() > MAX_TOKEN_CHARS {
            return Err(bad_cursor("cursor is too long"));
        }
        if !token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
        {
            return Err(bad_cursor("cursor contains invalid characters"));
        }

        let payload = BASE64
            .decode(token)
            .map_err(|_| bad_cursor("cursor is not valid base64"))?;
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_BYTES {
            return Err(bad_cursor("cursor payload has an unexpected size"));
        }

        let cursor: ListCursor = serde_json::from_slice(&payload)
            .map_err(|_| bad_cursor("cursor payload is not recognized"))?;
        if cursor.id.is_nil() {
            return Err(bad_cursor("cursor row id is invalid"));
        }

        Ok(cursor)
    }
}

fn bad_cursor(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}
