use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_LEAGUE: &str = "Fate%20of%20the%20Vaal";
pub const DEFAULT_REALM: &str = "poe2";
pub const DEFAULT_COOLDOWN_MS: u64 = 5_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;
pub const DEFAULT_IN_FLIGHT_SETTLE_MS: u64 = 5_000;
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 10;
pub const DEFAULT_AUTH_ALERT_REPEATS: u8 = 3;
pub const DEFAULT_JOURNAL_PATH: &str = "sniper-journal.db";
pub const MAX_COOLDOWN_MS: u64 = 600_000;
pub const MIN_MAX_RECONNECT_ATTEMPTS: u32 = 1;
pub const MAX_MAX_RECONNECT_ATTEMPTS: u32 = 100;
pub const MIN_RECONNECT_DELAY_MS: u64 = 250;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 300_000;
pub const MIN_DEDUP_CAPACITY: usize = 1;
pub const MAX_DEDUP_CAPACITY: usize = 1_000_000;
pub const MAX_IN_FLIGHT_SETTLE_MS: u64 = 60_000;
pub const MIN_FETCH_BATCH_SIZE: usize = 1;
pub const MAX_FETCH_BATCH_SIZE: usize = 10;
pub const MAX_AUTH_ALERT_REPEATS: u8 = 10;

/// Opaque identifier of one listing notification occurrence.
pub type ListingToken = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: String,
    pub display_name: String,
    pub sound_profile: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl QueryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub status: QueryStatus,
    pub connected: bool,
}

impl QueryState {
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn running() -> Self {
        Self {
            status: QueryStatus::Running,
            connected: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub query_id: String,
    pub token: ListingToken,
    pub claim_token: String,
    pub item_name: String,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
    pub account_name: String,
}

impl Listing {
    pub fn price_label(&self) -> String {
        match (self.price_amount, self.price_currency.as_deref()) {
            (Some(amount), Some(currency)) => format!("{amount} {currency}"),
            _ => "No price".to_string(),
        }
    }
}

/// One batch-lookup result as delivered by a transport, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingRecord {
    pub id: String,
    pub claim_token: Option<String>,
    pub item_name: Option<String>,
    pub type_line: Option<String>,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    Listings(Vec<ListingToken>),
    Closed { code: Option<u16>, reason: String },
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryArgs {
    pub id: String,
    pub name: Option<String>,
    pub sound_profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SniperArgs {
    pub poesessid: Option<String>,
    pub cf_clearance: Option<String>,
    pub league: Option<String>,
    pub realm: Option<String>,
    pub queries: Option<Vec<QueryArgs>>,
    pub cooldown_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub dedup_capacity: Option<usize>,
    pub in_flight_settle_ms: Option<u64>,
    pub fetch_batch_size: Option<usize>,
    pub auth_alert_repeats: Option<u8>,
    pub journal_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TradeApiConfig {
    pub poesessid: String,
    pub cf_clearance: Option<String>,
    pub league: String,
    pub realm: String,
}

impl TradeApiConfig {
    pub fn cookie_header(&self) -> String {
        match self.cf_clearance.as_deref() {
            Some(clearance) => format!("POESESSID={}; cf_clearance={clearance}", self.poesessid),
            None => format!("POESESSID={}", self.poesessid),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queries: Vec<Query>,
    pub cooldown_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub dedup_capacity: usize,
    pub in_flight_settle_ms: u64,
    pub fetch_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            in_flight_settle_ms: DEFAULT_IN_FLIGHT_SETTLE_MS,
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SniperConfig {
    pub api: TradeApiConfig,
    pub engine: EngineConfig,
    pub auth_alert_repeats: u8,
    pub journal_path: String,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn normalize_queries(queries: Vec<QueryArgs>) -> Result<Vec<Query>, AppError> {
    if queries.is_empty() {
        return Err(AppError::InvalidArgument(
            "at least one query is required".to_string(),
        ));
    }

    let mut seen_ids = HashSet::with_capacity(queries.len());
    let mut normalized = Vec::with_capacity(queries.len());
    for query in queries {
        let id = query.id.trim().to_string();
        if id.is_empty() || !id.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidArgument(
                "query id must be non-empty alphanumeric ASCII".to_string(),
            ));
        }
        if !seen_ids.insert(id.clone()) {
            return Err(AppError::InvalidArgument(format!(
                "duplicate query id '{id}'"
            )));
        }

        let display_name = trimmed(query.name).unwrap_or_else(|| id.clone());
        normalized.push(Query {
            id,
            display_name,
            sound_profile: trimmed(query.sound_profile),
        });
    }

    Ok(normalized)
}

impl SniperArgs {
    pub fn normalize(self) -> Result<SniperConfig, AppError> {
        let poesessid = trimmed(self.poesessid)
            .ok_or_else(|| AppError::InvalidArgument("poesessid is required".to_string()))?;
        let cf_clearance = trimmed(self.cf_clearance);
        let league = trimmed(self.league).unwrap_or_else(|| DEFAULT_LEAGUE.to_string());
        let realm = trimmed(self.realm).unwrap_or_else(|| DEFAULT_REALM.to_string());

        let queries = normalize_queries(self.queries.unwrap_or_default())?;

        let cooldown_ms = self.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS);
        if cooldown_ms > MAX_COOLDOWN_MS {
            return Err(AppError::InvalidArgument(format!(
                "cooldownMs must be at most {MAX_COOLDOWN_MS}"
            )));
        }

        let max_reconnect_attempts = self
            .max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        if !(MIN_MAX_RECONNECT_ATTEMPTS..=MAX_MAX_RECONNECT_ATTEMPTS)
            .contains(&max_reconnect_attempts)
        {
            return Err(AppError::InvalidArgument(format!(
                "maxReconnectAttempts must be between {MIN_MAX_RECONNECT_ATTEMPTS} and {MAX_MAX_RECONNECT_ATTEMPTS}"
            )));
        }

        let reconnect_delay_ms = self
            .reconnect_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS)
            .contains(&heartbeat_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "heartbeatIntervalMs must be between {MIN_HEARTBEAT_INTERVAL_MS} and {MAX_HEARTBEAT_INTERVAL_MS}"
            )));
        }

        let dedup_capacity = self.dedup_capacity.unwrap_or(DEFAULT_DEDUP_CAPACITY);
        if !(MIN_DEDUP_CAPACITY..=MAX_DEDUP_CAPACITY).contains(&dedup_capacity) {
            return Err(AppError::InvalidArgument(format!(
                "dedupCapacity must be between {MIN_DEDUP_CAPACITY} and {MAX_DEDUP_CAPACITY}"
            )));
        }

        let in_flight_settle_ms = self
            .in_flight_settle_ms
            .unwrap_or(DEFAULT_IN_FLIGHT_SETTLE_MS);
        if in_flight_settle_ms > MAX_IN_FLIGHT_SETTLE_MS {
            return Err(AppError::InvalidArgument(format!(
                "inFlightSettleMs must be at most {MAX_IN_FLIGHT_SETTLE_MS}"
            )));
        }

        let fetch_batch_size = self.fetch_batch_size.unwrap_or(DEFAULT_FETCH_BATCH_SIZE);
        if !(MIN_FETCH_BATCH_SIZE..=MAX_FETCH_BATCH_SIZE).contains(&fetch_batch_size) {
            return Err(AppError::InvalidArgument(format!(
                "fetchBatchSize must be between {MIN_FETCH_BATCH_SIZE} and {MAX_FETCH_BATCH_SIZE}"
            )));
        }

        let auth_alert_repeats = self
            .auth_alert_repeats
            .unwrap_or(DEFAULT_AUTH_ALERT_REPEATS);
        if auth_alert_repeats > MAX_AUTH_ALERT_REPEATS {
            return Err(AppError::InvalidArgument(format!(
                "authAlertRepeats must be at most {MAX_AUTH_ALERT_REPEATS}"
            )));
        }

        let journal_path =
            trimmed(self.journal_path).unwrap_or_else(|| DEFAULT_JOURNAL_PATH.to_string());

        Ok(SniperConfig {
            api: TradeApiConfig {
                poesessid,
                cf_clearance,
                league,
                realm,
            },
            engine: EngineConfig {
                queries,
                cooldown_ms,
                max_reconnect_attempts,
                reconnect_delay_ms,
                heartbeat_interval_ms,
                dedup_capacity,
                in_flight_settle_ms,
                fetch_batch_size,
            },
            auth_alert_repeats,
            journal_path,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LiveFeedWire {
    #[serde(default)]
    pub new: Option<Vec<String>>,
}

pub fn parse_live_feed_payload(payload: &mut [u8]) -> FeedFrame {
    match simd_json::serde::from_slice::<LiveFeedWire>(payload) {
        Ok(LiveFeedWire { new: Some(tokens) }) if !tokens.is_empty() => FeedFrame::Listings(tokens),
        _ => FeedFrame::Ignored,
    }
}

#[derive(Debug, Deserialize)]
pub struct FetchResponseWire {
    #[serde(default)]
    pub result: Vec<Option<FetchEntryWire>>,
}

#[derive(Debug, Deserialize)]
pub struct FetchEntryWire {
    pub id: String,
    pub listing: Option<FetchListingWire>,
    pub item: Option<FetchItemWire>,
}

#[derive(Debug, Deserialize)]
pub struct FetchListingWire {
    pub hideout_token: Option<String>,
    pub price: Option<FetchPriceWire>,
    pub account: Option<FetchAccountWire>,
}

#[derive(Debug, Deserialize)]
pub struct FetchPriceWire {
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FetchAccountWire {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FetchItemWire {
    pub name: Option<String>,
    #[serde(rename = "typeLine")]
    pub type_line: Option<String>,
}

impl From<FetchEntryWire> for ListingRecord {
    fn from(value: FetchEntryWire) -> Self {
        let (claim_token, price, account_name) = match value.listing {
            Some(listing) => (
                listing.hideout_token,
                listing.price,
                listing.account.and_then(|account| account.name),
            ),
            None => (None, None, None),
        };
        let (price_amount, price_currency) = match price {
            Some(price) => (price.amount, price.currency),
            None => (None, None),
        };
        let (item_name, type_line) = match value.item {
            Some(item) => (item.name, item.type_line),
            None => (None, None),
        };

        Self {
            id: value.id,
            claim_token,
            item_name,
            type_line,
            price_amount,
            price_currency,
            account_name,
        }
    }
}

pub fn parse_fetch_payload(payload: &mut [u8]) -> Result<Vec<ListingRecord>, AppError> {
    let wire: FetchResponseWire = simd_json::serde::from_slice(payload)?;
    Ok(wire
        .result
        .into_iter()
        .flatten()
        .map(ListingRecord::from)
        .collect())
}
