use crate::domain::week::to_iso_z;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_PREVIEW_CHARS: usize = 500;

/// Raw booking fetch for one room over a UTC window.
#[async_trait]
pub trait BookingClient: Send + Sync {
    async fn list_bookings(
        &self,
        access_token: &str,
        room_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestBookingClient {
    client: Client,
    api_host: String,
}

/// The endpoint answers with either a bare array or `{ "items": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BookingsPayload {
    List(Vec<serde_json::Value>),
    Page {
        #[serde(default)]
        items: Vec<serde_json::Value>,
    },
}

impl BookingsPayload {
    fn into_items(self) -> Vec<serde_json::Value> {
        match self {
            BookingsPayload::List(items) | BookingsPayload::Page { items } => items,
        }
    }
}

impl ReqwestBookingClient {
    pub fn new(api_host: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "falling back to default HTTP client");
                Client::new()
            });
        Self {
            client,
            api_host: api_host.into(),
        }
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Precondition(format!("{field} must not be empty")));
        }
        Ok(())
    }

    pub fn booking_requests_url(
        &self,
        room_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Url, InfraError> {
        let mut url = Url::parse(&format!("https://{}/", self.api_host.trim())).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid api host '{}': {error}", self.api_host))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("booking api URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("api");
            segments.push("Resources");
            segments.push(room_id);
            segments.push("BookingRequests");
        }
        url.query_pairs_mut()
            .append_pair("StartDate", &to_iso_z(start))
            .append_pair("EndDate", &to_iso_z(end))
            .append_pair("CheckSplitPermissions", "true");
        Ok(url)
    }
}

fn error_preview(body: &str) -> String {
    body.chars().take(ERROR_PREVIEW_CHARS).collect()
}

#[async_trait]
impl BookingClient for ReqwestBookingClient {
    async fn list_bookings(
        &self,
        access_token: &str,
        room_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(room_id, "room id")?;
        let url = self.booking_requests_url(room_id, start, end)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("listing bookings for {room_id}: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("reading bookings response for {room_id}: {error}"))
        })?;

        if !status.is_success() {
            return Err(InfraError::Upstream {
                status: status.as_u16(),
                body: error_preview(&body),
            });
        }

        let payload: BookingsPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::Upstream {
                status: status.as_u16(),
                body: format!("invalid bookings payload: {error}; body={}", error_preview(&body)),
            }
        })?;
        let items = payload.into_items();
        tracing::debug!(room_id, count = items.len(), "bookings fetched");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn booking_url_encodes_path_and_query() {
        let client = ReqwestBookingClient::new("api.example.test");
        let url = client
            .booking_requests_url(
                "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
                at("2025-08-08T22:00:00Z"),
                at("2025-08-09T09:59:00Z"),
            )
            .expect("build url");
        let rendered = url.as_str();
        assert!(rendered.starts_with(
            "https://api.example.test/api/Resources/aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee/BookingRequests?"
        ));
        assert!(rendered.contains("StartDate=2025-08-08T22%3A00%3A00Z"));
        assert!(rendered.contains("EndDate=2025-08-09T09%3A59%3A00Z"));
        assert!(rendered.ends_with("CheckSplitPermissions=true"));
    }

    #[test]
    fn invalid_host_is_config_error() {
        let client = ReqwestBookingClient::new("not a host");
        let error = client
            .booking_requests_url("r", at("2025-08-08T22:00:00Z"), at("2025-08-09T09:59:00Z"))
            .expect_err("invalid host");
        assert!(matches!(error, InfraError::InvalidConfig(_)));
    }

    #[test]
    fn payload_accepts_list_or_items_object() {
        let list: BookingsPayload = serde_json::from_str(r#"[{"Name":"a"},{"Name":"b"}]"#).expect("list");
        assert_eq!(list.into_items().len(), 2);
        let page: BookingsPayload = serde_json::from_str(r#"{"items":[{"Name":"a"}]}"#).expect("page");
        assert_eq!(page.into_items().len(), 1);
        let empty: BookingsPayload = serde_json::from_str(r#"{"total":0}"#).expect("empty");
        assert!(empty.into_items().is_empty());
    }

    #[test]
    fn error_preview_is_truncated_to_500_chars() {
        let body = "x".repeat(1200);
        assert_eq!(error_preview(&body).len(), 500);
    }

    #[tokio::test]
    async fn empty_token_is_rejected_before_any_request() {
        let client = ReqwestBookingClient::new("api.example.test");
        let error = client
            .list_bookings("  ", "room", at("2025-08-08T22:00:00Z"), at("2025-08-09T09:59:00Z"))
            .await
            .expect_err("empty token");
        assert!(matches!(error, InfraError::Precondition(_)));
    }
}
