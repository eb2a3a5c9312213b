//! Response types shared by the list endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One page of results plus the cursor for the next one.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    /// Items in page order.
    pub data: Vec<T>,
    /// Token for the next page; null when this page is the last.
    pub next_cursor: Option<String>,
    /// True when another page exists.
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, next_cursor: Option<String>) -> Self {
        Self {
            has_more: next_cursor.is_some(),
            data,
            next_cursor,
        }
    }
}
