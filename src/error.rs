use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown query: {0}")]
    UnknownQuery(String),
    #[error("authorization expired (status {status})")]
    AuthorizationExpired { status: u16 },
    #[error("upstream rejected request: {status} - {body}")]
    Upstream { status: u16, body: String },
    #[error("live feed unavailable: {0}")]
    FeedUnavailable(String),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
}

impl AppError {
    /// Credential failures affect every query at once, so callers escalate them engine-wide.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::AuthorizationExpired { .. })
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthorizationExpired { status },
            _ => Self::Upstream { status, body },
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_forbidden_as_authorization_failure() {
        assert!(AppError::from_status(403, String::new()).is_authorization());
        assert!(AppError::from_status(401, String::new()).is_authorization());
    }

    #[test]
    fn keeps_other_statuses_as_upstream_errors() {
        let error = AppError::from_status(429, "slow down".to_string());
        assert!(!error.is_authorization());
        assert_eq!(
            error.to_string(),
            "upstream rejected request: 429 - slow down"
        );
    }
}
