//! Brokerage provider client
//!
//! Mirrors the order history of a brokerage account. The listing endpoint
//! (`GET /v1/orders`) uses opaque string cursors handed back verbatim, so
//! the pagination cursor is a JSON string. Order events only ever update a
//! record; brokers retain canceled orders, so nothing is marked deleted.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::client::{
    FetchRequest, PageCursor, ProviderClient, ProviderDescriptor, ProviderError, RecordPage,
    UpstreamRecord, error_for_status, retry_after_from, transport_error,
};
use async_trait::async_trait;

pub const PROVIDER_KEY: &str = "broker";
const RECORD_KIND: &str = "order";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
}

impl BrokerClient {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn order_record(order: &Value) -> UpstreamRecord {
    let external_id = order
        .get("order_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let activity_at = order
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc));
    UpstreamRecord {
        external_id,
        kind: RECORD_KIND.to_string(),
        payload: order.clone(),
        deleted: false,
        activity_at,
    }
}

#[async_trait]
impl ProviderClient for BrokerClient {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            key: PROVIDER_KEY.to_string(),
            display_name: "Order Broker".to_string(),
            allows_multiple: true,
            supports_webhooks: true,
        }
    }

    async fn fetch_page(
        &self,
        secret: &str,
        request: &FetchRequest,
    ) -> Result<RecordPage, ProviderError> {
        let mut query = vec![("limit", request.page_size.to_string())];
        if let Some(cursor) = request.cursor.as_ref().and_then(PageCursor::as_str) {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self
            .http
            .get(format!("{}/v1/orders", self.base_url))
            .query(&query)
            .header("authorization", format!("Bearer {}", secret))
            .header("accept", "application/json")
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

        let orders = body
            .get("orders")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed {
                detail: "response is missing the orders array".to_string(),
            })?;

        let records = orders.iter().map(order_record).collect();
        let next_cursor = body
            .get("next_cursor")
            .and_then(Value::as_str)
            .map(PageCursor::from_string);

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
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed {
                detail: "type field missing".to_string(),
            })?;
        if !event_type.starts_with("order.") {
            return Ok(Vec::new());
        }
        let order = event.get("order").ok_or_else(|| ProviderError::Malformed {
            detail: "order field missing".to_string(),
        })?;
        Ok(vec![order_record(order)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_page_follows_opaque_cursor() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .and(query_param("cursor", "c_abc"))
            .and(query_param("limit", "25"))
            .and(header("authorization", "Bearer key_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [
                    {
                        "order_id": "ord_1",
                        "symbol": "AAPL",
                        "status": "filled",
                        "updated_at": "2026-03-01T14:00:00+00:00"
                    },
                    {
                        "order_id": "ord_2",
                        "symbol": "MSFT",
                        "status": "open",
                        "updated_at": "2026-03-01T14:05:00+00:00"
                    }
                ],
                "next_cursor": "c_def"
            })))
            .mount(&mock_server)
            .await;

        let client = BrokerClient::new(mock_server.uri());
        let request = FetchRequest {
            cursor: Some(PageCursor::from_string("c_abc")),
            page_size: 25,
            last_synced_at: None,
        };
        let page = client.fetch_page("key_test", &request).await.unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].external_id, "ord_1");
        assert_eq!(page.records[0].kind, "order");
        assert!(page.records[0].activity_at.is_some());
        assert_eq!(
            page.next_cursor.and_then(|c| c.as_str().map(str::to_string)),
            Some("c_def".to_string())
        );
    }

    #[tokio::test]
    async fn test_first_page_omits_cursor_param() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [],
                "next_cursor": null
            })))
            .mount(&mock_server)
            .await;

        let client = BrokerClient::new(mock_server.uri());
        let request = FetchRequest {
            cursor: None,
            page_size: 100,
            last_synced_at: None,
        };
        let page = client.fetch_page("key_test", &request).await.unwrap();

        assert!(page.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_forbidden_status_is_terminal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let client = BrokerClient::new(mock_server.uri());
        let request = FetchRequest {
            cursor: None,
            page_size: 50,
            last_synced_at: None,
        };
        let err = client.fetch_page("key_bad", &request).await.unwrap_err();

        assert!(matches!(err, ProviderError::Unauthorized { status: 403 }));
    }

    #[tokio::test]
    async fn test_rate_limit_without_hint() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let client = BrokerClient::new(mock_server.uri());
        let request = FetchRequest {
            cursor: None,
            page_size: 50,
            last_synced_at: None,
        };
        let err = client.fetch_page("key_test", &request).await.unwrap_err();

        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: None
            }
        ));
    }

    #[test]
    fn test_webhook_order_event() {
        let client = BrokerClient::new("https://broker.invalid");
        let body = json!({
            "type": "order.filled",
            "order": {
                "order_id": "ord_9",
                "status": "filled",
                "updated_at": "2026-03-02T10:00:00+00:00"
            }
        });

        let records = client
            .parse_webhook(body.to_string().as_bytes())
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id, "ord_9");
        assert!(!records[0].deleted);
    }

    #[test]
    fn test_webhook_non_order_event_is_skipped() {
        let client = BrokerClient::new("https://broker.invalid");
        let body = json!({ "type": "account.updated", "account": {} });

        let records = client
            .parse_webhook(body.to_string().as_bytes())
            .unwrap();

        assert!(records.is_empty());
    }

    #[test]
    fn test_webhook_missing_order_is_malformed() {
        let client = BrokerClient::new("https://broker.invalid");
        let body = json!({ "type": "order.updated" });

        let err = client
            .parse_webhook(body.to_string().as_bytes())
            .unwrap_err();

        assert!(matches!(err, ProviderError::Malformed { .. }));
    }
}
