use crate::error::AppError;
use crate::sniper::events::{EngineEvent, EventReceiver};
use crate::sniper::transport::{LiveFeed, MarketTransport};
use crate::sniper::types::{FeedFrame, Listing, ListingRecord, ListingToken};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) fn sample_listing(query_id: &str, token: &str) -> Listing {
    Listing {
        query_id: query_id.to_string(),
        token: token.to_string(),
        claim_token: format!("claim-{token}"),
        item_name: format!("Item {token}"),
        price_amount: Some(1.0),
        price_currency: Some("divine".to_string()),
        account_name: "seller".to_string(),
    }
}

pub(crate) fn drain_events(receiver: &mut EventReceiver) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) struct ScriptedFeed {
    frames: mpsc::UnboundedReceiver<FeedFrame>,
    heartbeats: Arc<AtomicUsize>,
}

#[async_trait]
impl LiveFeed for ScriptedFeed {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, AppError>> {
        self.frames.recv().await.map(Ok)
    }

    async fn heartbeat(&mut self) -> Result<(), AppError> {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}

/// In-process marketplace double. Every opened feed is driven from the test through
/// [`MockTransport::push`]; lookups resolve from the listings registered up front.
#[derive(Default)]
pub(crate) struct MockTransport {
    refuse_connections: AtomicBool,
    crash_on_open: AtomicBool,
    opens: Mutex<HashMap<String, usize>>,
    feeds: Mutex<HashMap<String, mpsc::UnboundedSender<FeedFrame>>>,
    heartbeats: Arc<AtomicUsize>,
    records: Mutex<HashMap<String, ListingRecord>>,
    fetch_calls: Mutex<Vec<Vec<ListingToken>>>,
    fetch_failures: Mutex<VecDeque<AppError>>,
    claim_calls: Mutex<Vec<String>>,
    claim_failures: Mutex<VecDeque<AppError>>,
    claim_latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_listing(&self, token: &str, claim_token: &str, item_name: &str) {
        self.records.lock().insert(
            token.to_string(),
            ListingRecord {
                id: token.to_string(),
                claim_token: Some(claim_token.to_string()),
                item_name: Some(item_name.to_string()),
                type_line: None,
                price_amount: Some(1.0),
                price_currency: Some("divine".to_string()),
                account_name: Some("seller".to_string()),
            },
        );
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::Relaxed);
    }

    /// Makes the next connection task panic inside `open_feed`.
    pub(crate) fn crash_on_open(&self) {
        self.crash_on_open.store(true, Ordering::Relaxed);
    }

    /// Delivers one notification frame on the query's current feed.
    pub(crate) fn push(&self, query_id: &str, tokens: &[&str]) -> bool {
        let frame = FeedFrame::Listings(tokens.iter().map(|token| token.to_string()).collect());
        self.send_frame(query_id, frame)
    }

    pub(crate) fn send_frame(&self, query_id: &str, frame: FeedFrame) -> bool {
        match self.feeds.lock().get(query_id) {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Ends the query's current feed as if the remote side went away.
    pub(crate) fn drop_feed(&self, query_id: &str) {
        self.feeds.lock().remove(query_id);
    }

    pub(crate) fn opens(&self, query_id: &str) -> usize {
        self.opens.lock().get(query_id).copied().unwrap_or(0)
    }

    pub(crate) fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub(crate) fn fetch_calls(&self) -> Vec<Vec<ListingToken>> {
        self.fetch_calls.lock().clone()
    }

    pub(crate) fn claim_calls(&self) -> Vec<String> {
        self.claim_calls.lock().clone()
    }

    pub(crate) fn fail_next_fetch(&self, error: AppError) {
        self.fetch_failures.lock().push_back(error);
    }

    pub(crate) fn fail_next_claim(&self, error: AppError) {
        self.claim_failures.lock().push_back(error);
    }

    pub(crate) fn set_claim_latency(&self, latency: Duration) {
        *self.claim_latency.lock() = Some(latency);
    }
}

#[async_trait]
impl MarketTransport for MockTransport {
    async fn open_feed(&self, query_id: &str) -> Result<Box<dyn LiveFeed>, AppError> {
        *self.opens.lock().entry(query_id.to_string()).or_default() += 1;
        if self.crash_on_open.swap(false, Ordering::Relaxed) {
            panic!("transport crashed while opening {query_id}");
        }
        if self.refuse_connections.load(Ordering::Relaxed) {
            return Err(AppError::FeedUnavailable("connection refused".to_string()));
        }

        let (sender, frames) = mpsc::unbounded_channel();
        self.feeds.lock().insert(query_id.to_string(), sender);
        Ok(Box::new(ScriptedFeed {
            frames,
            heartbeats: Arc::clone(&self.heartbeats),
        }))
    }

    async fn fetch_listings(
        &self,
        _query_id: &str,
        tokens: &[ListingToken],
    ) -> Result<Vec<ListingRecord>, AppError> {
        self.fetch_calls.lock().push(tokens.to_vec());
        if let Some(error) = self.fetch_failures.lock().pop_front() {
            return Err(error);
        }

        let records = self.records.lock();
        Ok(tokens
            .iter()
            .filter_map(|token| records.get(token).cloned())
            .collect())
    }

    async fn claim(&self, claim_token: &str) -> Result<(), AppError> {
        self.claim_calls.lock().push(claim_token.to_string());
        let latency = *self.claim_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.claim_failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
