use crate::sniper::engine::EngineInner;
use crate::sniper::events::{EngineEvent, LogLevel, ReconnectNotice};
use crate::sniper::transport::LiveFeed;
use crate::sniper::types::{FeedFrame, Query};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct ConnectionHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
    pub session: u64,
}

enum FeedExit {
    Cancelled,
    Lost(String),
}

/// Keeps one query's live feed open until the query stops or reconnects run out.
pub(crate) async fn run_connection(
    inner: Arc<EngineInner>,
    query: Query,
    session: u64,
    cancel_token: CancellationToken,
) {
    let reconnect_delay = Duration::from_millis(inner.config.reconnect_delay_ms);
    let max_attempts = inner.config.max_reconnect_attempts;
    let mut reconnect_attempts = 0_u32;

    while !cancel_token.is_cancelled() && inner.states.get(&query.id).status.is_active() {
        let opened = tokio::select! {
            _ = cancel_token.cancelled() => break,
            opened = inner.transport.open_feed(&query.id) => opened,
        };

        let reason = match opened {
            Ok(mut feed) => {
                reconnect_attempts = 0;
                inner.mark_connected(&query, true);
                inner.events.log(
                    LogLevel::Info,
                    Some(&query.id),
                    format!("Connected to live feed for {}", query.display_name),
                );

                let exit = pump_feed(&inner, &query, &mut *feed, &cancel_token).await;
                feed.close().await;

                // Whoever cancelled owns the stopped/disconnected notifications.
                match exit {
                    FeedExit::Cancelled => break,
                    FeedExit::Lost(reason) => {
                        inner.mark_connected(&query, false);
                        reason
                    }
                }
            }
            Err(error) => format!("connect failed: {error}"),
        };

        if cancel_token.is_cancelled() || !inner.states.get(&query.id).status.is_active() {
            break;
        }

        reconnect_attempts = reconnect_attempts.saturating_add(1);
        if reconnect_attempts > max_attempts {
            inner.fail_query(
                &query.id,
                session,
                format!("max reconnect attempts reached ({max_attempts}); last error: {reason}"),
            );
            break;
        }

        inner.events.log(
            LogLevel::Warn,
            Some(&query.id),
            format!(
                "{reason}; reconnecting in {}ms (attempt {reconnect_attempts}/{max_attempts})",
                reconnect_delay.as_millis()
            ),
        );
        inner.events.emit(EngineEvent::Reconnecting(ReconnectNotice {
            query_id: query.id.clone(),
            attempt: reconnect_attempts,
            delay_ms: inner.config.reconnect_delay_ms,
        }));

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    tracing::debug!(query = %query.id, session, "connection task finished");
}

async fn pump_feed(
    inner: &Arc<EngineInner>,
    query: &Query,
    feed: &mut dyn LiveFeed,
    cancel_token: &CancellationToken,
) -> FeedExit {
    let period = Duration::from_millis(inner.config.heartbeat_interval_ms);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let frame = tokio::select! {
            _ = cancel_token.cancelled() => return FeedExit::Cancelled,
            _ = heartbeat.tick() => {
                if let Err(error) = feed.heartbeat().await {
                    return FeedExit::Lost(format!("heartbeat failed: {error}"));
                }
                continue;
            }
            frame = feed.next_frame() => frame,
        };

        match frame {
            Some(Ok(FeedFrame::Listings(tokens))) => {
                tracing::debug!(query = %query.id, count = tokens.len(), "listing notification");
                EngineInner::dispatch(inner, &query.id, tokens);
            }
            Some(Ok(FeedFrame::Ignored)) => {}
            Some(Ok(FeedFrame::Closed { code, reason })) => {
                let code = code.map_or_else(|| "none".to_string(), |code| code.to_string());
                return FeedExit::Lost(format!("feed closed (code {code}) {reason}"));
            }
            Some(Err(error)) => return FeedExit::Lost(format!("feed error: {error}")),
            None => return FeedExit::Lost("feed ended".to_string()),
        }
    }
}
