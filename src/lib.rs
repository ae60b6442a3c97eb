pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod sniper;
pub mod state;

use commands::control::{execute, ConsoleReply, ControlCommand};
use error::AppError;
use sniper::engine::Engine;
use sniper::events::{EngineEvent, EventReceiver};
use sniper::journal;
use sniper::trade_api::TradeApiTransport;
use sqlx::SqlitePool;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "trade_sniper=info,info";
const ALERT_SPACING_MS: u64 = 500;
const EVENT_DRAIN_TIMEOUT_MS: u64 = 2_000;

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn ring_alert(repeats: u8) {
    let mut stdout = tokio::io::stdout();
    for index in 0..repeats {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(ALERT_SPACING_MS)).await;
        }
        if stdout.write_all(b"\x07").await.is_err() || stdout.flush().await.is_err() {
            return;
        }
    }
}

async fn consume_events(mut events: EventReceiver, pool: SqlitePool, alert_repeats: u8) {
    while let Some(event) = events.recv().await {
        tracing::trace!(kind = event.kind(), query = event.query_id(), "engine event");
        if matches!(event, EngineEvent::AuthorizationExpired) && alert_repeats > 0 {
            tokio::spawn(ring_alert(alert_repeats));
        }
        if let Err(error) = journal::record_event(&pool, &event).await {
            tracing::warn!("journal write failed: {error}");
        }
    }
}

async fn run_console(state: &AppState) -> Result<(), AppError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; shutting down");
                return Ok(());
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            tracing::info!("console input closed; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match ControlCommand::parse(&line) {
            Ok(command) => execute(state, command).await,
            Err(error) => Err(error),
        };
        match reply {
            Ok(ConsoleReply::Output(text)) => println!("{text}"),
            Ok(ConsoleReply::Quit) => return Ok(()),
            Err(error) => println!("error: {error}"),
        }
    }
}

pub async fn run() -> Result<(), AppError> {
    init_tracing();

    let config = config::load_config()?;
    let journal_path = db::resolve_journal_path(&config.journal_path);
    let db_pool = db::initialize_pool_from_path(&journal_path).await?;
    tracing::info!(journal = %journal_path.display(), "journal ready");

    let transport = Arc::new(TradeApiTransport::new(config.api.clone())?);
    let (engine, events) = Engine::new(config.engine.clone(), transport);
    let consumer = tokio::spawn(consume_events(
        events,
        db_pool.clone(),
        config.auth_alert_repeats,
    ));

    let started = engine.start_all();
    tracing::info!(
        league = %config.api.league,
        realm = %config.api.realm,
        "watching {} queries",
        started.len()
    );

    let state = AppState::new(db_pool, engine);
    let console_result = run_console(&state).await;

    let stopped = state.engine.stop_all().await;
    tracing::info!("stopped {} queries", stopped.len());
    drop(state);

    // In-flight claims may still hold the engine; don't wait on them forever.
    if tokio::time::timeout(Duration::from_millis(EVENT_DRAIN_TIMEOUT_MS), consumer)
        .await
        .is_err()
    {
        tracing::debug!("event consumer still busy at exit");
    }

    console_result
}
