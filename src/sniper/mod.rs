pub mod connection;
pub mod dedup;
pub mod engine;
pub mod events;
pub mod fetcher;
pub mod gate;
pub mod journal;
pub mod state_store;
pub mod trade_api;
pub mod transport;
pub mod trigger;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub const LISTING_SEEN_EVENT: &str = "listing-seen";
pub const ACTION_RESULT_EVENT: &str = "action-result";
pub const CONNECTED_EVENT: &str = "connected";
pub const DISCONNECTED_EVENT: &str = "disconnected";
pub const RECONNECTING_EVENT: &str = "reconnecting";
pub const QUERY_STATE_CHANGE_EVENT: &str = "query-state-change";
pub const QUERY_ERROR_EVENT: &str = "query-error";
pub const AUTHORIZATION_EXPIRED_EVENT: &str = "authorization-expired";
pub const STATUS_CHANGE_EVENT: &str = "status-change";
pub const LOG_EVENT: &str = "log";
