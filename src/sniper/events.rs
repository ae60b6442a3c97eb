use crate::sniper::types::{Listing, QueryState};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use super::{
    ACTION_RESULT_EVENT, AUTHORIZATION_EXPIRED_EVENT, CONNECTED_EVENT, DISCONNECTED_EVENT,
    LISTING_SEEN_EVENT, LOG_EVENT, QUERY_ERROR_EVENT, QUERY_STATE_CHANGE_EVENT,
    RECONNECTING_EVENT, STATUS_CHANGE_EVENT,
};

pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub query_id: Option<String>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum ActionOutcome {
    Success {
        #[serde(rename = "elapsedMs")]
        elapsed_ms: u64,
    },
    Failure {
        reason: String,
        authorization: bool,
    },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub query_id: String,
    pub item_name: String,
    pub price: String,
    pub claim_token: String,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionNotice {
    pub query_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectNotice {
    pub query_id: String,
    pub attempt: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryStateNotice {
    pub query_id: String,
    pub state: QueryState,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryErrorNotice {
    pub query_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "payload")]
pub enum EngineEvent {
    ListingSeen(Listing),
    ActionResult(ActionReport),
    Connected(ConnectionNotice),
    Disconnected(ConnectionNotice),
    Reconnecting(ReconnectNotice),
    QueryStateChange(QueryStateNotice),
    QueryError(QueryErrorNotice),
    AuthorizationExpired,
    StatusChange { running: bool },
    Log(LogRecord),
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ListingSeen(_) => LISTING_SEEN_EVENT,
            Self::ActionResult(_) => ACTION_RESULT_EVENT,
            Self::Connected(_) => CONNECTED_EVENT,
            Self::Disconnected(_) => DISCONNECTED_EVENT,
            Self::Reconnecting(_) => RECONNECTING_EVENT,
            Self::QueryStateChange(_) => QUERY_STATE_CHANGE_EVENT,
            Self::QueryError(_) => QUERY_ERROR_EVENT,
            Self::AuthorizationExpired => AUTHORIZATION_EXPIRED_EVENT,
            Self::StatusChange { .. } => STATUS_CHANGE_EVENT,
            Self::Log(_) => LOG_EVENT,
        }
    }

    pub fn query_id(&self) -> Option<&str> {
        match self {
            Self::ListingSeen(listing) => Some(&listing.query_id),
            Self::ActionResult(report) => Some(&report.query_id),
            Self::Connected(notice) | Self::Disconnected(notice) => Some(&notice.query_id),
            Self::Reconnecting(notice) => Some(&notice.query_id),
            Self::QueryStateChange(notice) => Some(&notice.query_id),
            Self::QueryError(notice) => Some(&notice.query_id),
            Self::Log(record) => record.query_id.as_deref(),
            Self::AuthorizationExpired | Self::StatusChange { .. } => None,
        }
    }
}

/// Sending half of the engine's event stream. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Err(error) = self.sender.send(event) {
            tracing::debug!(kind = error.0.kind(), "event receiver dropped");
        }
    }

    pub fn log(&self, level: LogLevel, query_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        let scope = query_id.unwrap_or("-");
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(query = scope, "{message}"),
            LogLevel::Warn => tracing::warn!(query = scope, "{message}"),
            LogLevel::Error => tracing::error!(query = scope, "{message}"),
        }

        self.emit(EngineEvent::Log(LogRecord {
            level,
            message,
            query_id: query_id.map(str::to_string),
            timestamp_ms: now_unix_ms(),
        }));
    }
}

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds_use_wire_names() {
        assert_eq!(EngineEvent::AuthorizationExpired.kind(), "authorization-expired");
        assert_eq!(
            EngineEvent::StatusChange { running: true }.kind(),
            "status-change"
        );
        let reconnect = EngineEvent::Reconnecting(ReconnectNotice {
            query_id: "q1".to_string(),
            attempt: 2,
            delay_ms: 3_000,
        });
        assert_eq!(reconnect.kind(), "reconnecting");
        assert_eq!(reconnect.query_id(), Some("q1"));
    }

    #[test]
    fn log_reaches_receiver_with_scope() {
        let (sink, mut receiver) = EventSink::channel();
        sink.log(LogLevel::Warn, Some("q1"), "cooldown");

        match receiver.try_recv() {
            Ok(EngineEvent::Log(record)) => {
                assert_eq!(record.level, LogLevel::Warn);
                assert_eq!(record.query_id.as_deref(), Some("q1"));
                assert_eq!(record.message, "cooldown");
            }
            other => panic!("expected log event, got {other:?}"),
        }
    }

    #[test]
    fn emitting_after_receiver_drop_is_harmless() {
        let (sink, receiver) = EventSink::channel();
        drop(receiver);
        sink.emit(EngineEvent::AuthorizationExpired);
    }
}
