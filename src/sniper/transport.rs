use crate::error::AppError;
use crate::sniper::types::{FeedFrame, ListingRecord, ListingToken};
use async_trait::async_trait;

/// One open push channel for a single query.
///
/// `next_frame` must be cancel-safe: the connection loop races it against the heartbeat
/// timer and the stop signal. `None` means the channel ended.
#[async_trait]
pub trait LiveFeed: Send {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, AppError>>;

    async fn heartbeat(&mut self) -> Result<(), AppError>;

    async fn close(&mut self);
}

/// Everything the engine needs from the marketplace. Credentials are the transport's concern;
/// expiry surfaces as [`AppError::AuthorizationExpired`].
#[async_trait]
pub trait MarketTransport: Send + Sync + 'static {
    async fn open_feed(&self, query_id: &str) -> Result<Box<dyn LiveFeed>, AppError>;

    async fn fetch_listings(
        &self,
        query_id: &str,
        tokens: &[ListingToken],
    ) -> Result<Vec<ListingRecord>, AppError>;

    async fn claim(&self, claim_token: &str) -> Result<(), AppError>;
}
