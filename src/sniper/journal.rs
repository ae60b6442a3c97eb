use crate::error::AppError;
use crate::sniper::events::{now_unix_ms, ActionOutcome, ActionReport, EngineEvent};
use crate::sniper::types::Listing;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

const MAX_RECENT_ACTIONS: u32 = 500;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionJournalEntry {
    pub id: i64,
    pub query_id: String,
    pub item_name: String,
    pub price: String,
    pub success: bool,
    pub elapsed_ms: Option<i64>,
    pub failure_reason: Option<String>,
    pub attempted_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionStats {
    pub listings_seen: i64,
    pub attempts: i64,
    pub successes: i64,
    pub authorization_failures: i64,
    pub average_success_ms: Option<f64>,
}

fn bool_to_sqlite(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn map_action_row(row: &sqlx::sqlite::SqliteRow) -> Result<ActionJournalEntry, AppError> {
    let outcome: String = row.try_get("outcome")?;

    Ok(ActionJournalEntry {
        id: row.try_get("id")?,
        query_id: row.try_get("query_id")?,
        item_name: row.try_get("item_name")?,
        price: row.try_get("price_label")?,
        success: outcome == "success",
        elapsed_ms: row.try_get("elapsed_ms")?,
        failure_reason: row.try_get("failure_reason")?,
        attempted_at_ms: row.try_get("attempted_at_ms")?,
    })
}

pub async fn record_listing(pool: &SqlitePool, listing: &Listing) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO listings_seen (query_id, listing_token, claim_token, item_name, price_label, account_name, seen_at_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&listing.query_id)
    .bind(&listing.token)
    .bind(&listing.claim_token)
    .bind(&listing.item_name)
    .bind(listing.price_label())
    .bind(&listing.account_name)
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn record_action(pool: &SqlitePool, report: &ActionReport) -> Result<(), AppError> {
    let (outcome, elapsed_ms, failure_reason, authorization) = match &report.outcome {
        ActionOutcome::Success { elapsed_ms } => (
            "success",
            Some(i64::try_from(*elapsed_ms).unwrap_or(i64::MAX)),
            None,
            false,
        ),
        ActionOutcome::Failure {
            reason,
            authorization,
        } => ("failure", None, Some(reason.as_str()), *authorization),
    };

    sqlx::query(
        "INSERT INTO claim_attempts (query_id, item_name, price_label, claim_token, outcome, elapsed_ms, failure_reason, authorization_failure, attempted_at_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&report.query_id)
    .bind(&report.item_name)
    .bind(&report.price)
    .bind(&report.claim_token)
    .bind(outcome)
    .bind(elapsed_ms)
    .bind(failure_reason)
    .bind(bool_to_sqlite(authorization))
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persists the event kinds the journal keeps. Returns whether anything was written.
pub async fn record_event(pool: &SqlitePool, event: &EngineEvent) -> Result<bool, AppError> {
    match event {
        EngineEvent::ListingSeen(listing) => record_listing(pool, listing).await.map(|_| true),
        EngineEvent::ActionResult(report) => record_action(pool, report).await.map(|_| true),
        _ => Ok(false),
    }
}

pub async fn recent_actions(
    pool: &SqlitePool,
    limit: u32,
) -> Result<Vec<ActionJournalEntry>, AppError> {
    let bounded_limit = limit.clamp(1, MAX_RECENT_ACTIONS);
    let rows = sqlx::query(
        "SELECT id, query_id, item_name, price_label, outcome, elapsed_ms, failure_reason, attempted_at_ms \
         FROM claim_attempts \
         ORDER BY attempted_at_ms DESC, id DESC \
         LIMIT ?",
    )
    .bind(i64::from(bounded_limit))
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(map_action_row(&row)?);
    }

    Ok(entries)
}

pub async fn action_stats(pool: &SqlitePool) -> Result<ActionStats, AppError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS attempts, \
                COALESCE(SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END), 0) AS successes, \
                COALESCE(SUM(authorization_failure), 0) AS authorization_failures, \
                AVG(CASE WHEN outcome = 'success' THEN elapsed_ms END) AS average_success_ms \
         FROM claim_attempts",
    )
    .fetch_one(pool)
    .await?;

    let listings_seen = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM listings_seen")
        .fetch_one(pool)
        .await?;

    Ok(ActionStats {
        listings_seen,
        attempts: row.try_get("attempts")?,
        successes: row.try_get("successes")?,
        authorization_failures: row.try_get("authorization_failures")?,
        average_success_ms: row.try_get("average_success_ms")?,
    })
}
