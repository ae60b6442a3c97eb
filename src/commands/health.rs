use crate::sniper::engine::Engine;
use crate::sniper::gate::remaining_secs;
use crate::state::AppState;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub db: &'static str,
    pub engine_running: bool,
    pub active_queries: usize,
    pub connected_queries: usize,
    pub cooldown_remaining_secs: Option<u64>,
}

pub async fn build_health_response(
    started_at: Instant,
    pool: &SqlitePool,
    engine: &Engine,
) -> HealthResponse {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    let states = engine.all_query_states();
    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        db: db_status,
        engine_running: engine.is_running(),
        active_queries: states
            .values()
            .filter(|state| state.status.is_active())
            .count(),
        connected_queries: states.values().filter(|state| state.connected).count(),
        cooldown_remaining_secs: engine.cooldown_remaining().map(remaining_secs),
    }
}

pub async fn health(state: &AppState) -> HealthResponse {
    build_health_response(state.started_at, &state.db_pool, &state.engine).await
}
