use crate::error::AppError;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};

const JOURNAL_PATH_ENV: &str = "TRADE_SNIPER_DB";

/// The environment override wins over the configured journal path.
pub fn resolve_journal_path(configured: &str) -> PathBuf {
    std::env::var(JOURNAL_PATH_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(configured))
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn initialize_pool_from_path(path: &Path) -> Result<SqlitePool, AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(connect_options).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_db_path() -> PathBuf {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock should be after unix epoch")
            .as_nanos();

        std::env::temp_dir()
            .join(format!("trade-sniper-{timestamp}"))
            .join("journal.db")
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db_path = unique_db_path();

        let pool = initialize_pool_from_path(&db_path)
            .await
            .expect("pool initialization should succeed");

        run_migrations(&pool)
            .await
            .expect("running migrations multiple times should succeed");

        let metadata_rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM app_metadata")
            .fetch_one(&pool)
            .await
            .expect("app_metadata table must exist and be queryable");
        assert_eq!(metadata_rows, 1);

        let journal_rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM claim_attempts")
            .fetch_one(&pool)
            .await
            .expect("claim_attempts table must exist");
        assert_eq!(journal_rows, 0);

        drop(pool);
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn configured_path_is_used_without_override() {
        if std::env::var(JOURNAL_PATH_ENV).is_err() {
            assert_eq!(
                resolve_journal_path("data/journal.db"),
                PathBuf::from("data/journal.db")
            );
        }
    }
}
