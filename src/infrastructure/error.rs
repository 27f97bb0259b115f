use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("fetch failed for room {room}: {source}")]
    RoomFetch {
        room: String,
        #[source]
        source: Box<InfraError>,
    },
    #[error("Invalid booking record: {0}")]
    InvalidBooking(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("session expired at {expires_at}")]
    SessionExpired { expires_at: DateTime<Utc> },
    #[error("Session refresh failed: {0}")]
    Refresh(String),
}

impl InfraError {
    /// Transport-level failures are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InfraError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(InfraError::Network("connection reset".to_string()).is_retryable());
        assert!(
            !InfraError::Upstream {
                status: 503,
                body: "busy".to_string()
            }
            .is_retryable()
        );
        assert!(!InfraError::Precondition("no rooms".to_string()).is_retryable());
    }

    #[test]
    fn room_fetch_names_room_and_status() {
        let error = InfraError::RoomFetch {
            room: "010.05.68".to_string(),
            source: Box::new(InfraError::Upstream {
                status: 401,
                body: "unauthorized".to_string(),
            }),
        };
        assert_eq!(
            error.to_string(),
            "fetch failed for room 010.05.68: HTTP 401: unauthorized"
        );
    }
}
