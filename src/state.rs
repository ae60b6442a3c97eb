use crate::sniper::engine::Engine;
use sqlx::SqlitePool;
use std::time::Instant;

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub engine: Engine,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, engine: Engine) -> Self {
        Self {
            started_at: Instant::now(),
            db_pool,
            engine,
        }
    }
}
