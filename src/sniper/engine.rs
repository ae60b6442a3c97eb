use crate::error::AppError;
use crate::sniper::connection::{run_connection, ConnectionHandle};
use crate::sniper::dedup::{DedupCache, InFlightTracker};
use crate::sniper::events::{
    ActionOutcome, ActionReport, ConnectionNotice, EngineEvent, EventReceiver, EventSink,
    LogLevel, QueryErrorNotice, QueryStateNotice,
};
use crate::sniper::fetcher::ListingFetcher;
use crate::sniper::gate::{remaining_secs, CooldownGate};
use crate::sniper::state_store::QueryStateStore;
use crate::sniper::transport::MarketTransport;
use crate::sniper::trigger::ActionTrigger;
use crate::sniper::types::{EngineConfig, Listing, ListingToken, Query, QueryState, QueryStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) states: QueryStateStore,
    pub(crate) transport: Arc<dyn MarketTransport>,
    pub(crate) events: EventSink,
    queries: RwLock<BTreeMap<String, Query>>,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
    dedup: Mutex<DedupCache>,
    in_flight: Mutex<InFlightTracker>,
    gate: Arc<CooldownGate>,
    fetcher: ListingFetcher,
    trigger: ActionTrigger,
    sessions: AtomicU64,
    authorization_latched: AtomicBool,
    running: AtomicBool,
}

impl EngineInner {
    fn display_name(&self, query_id: &str) -> String {
        self.queries
            .read()
            .get(query_id)
            .map(|query| query.display_name.clone())
            .unwrap_or_else(|| query_id.to_string())
    }

    fn connection_notice(&self, query_id: &str) -> ConnectionNotice {
        ConnectionNotice {
            query_id: query_id.to_string(),
            display_name: self.display_name(query_id),
        }
    }

    fn emit_state(&self, query_id: &str, state: QueryState) {
        self.events
            .emit(EngineEvent::QueryStateChange(QueryStateNotice {
                query_id: query_id.to_string(),
                state,
            }));
    }

    fn refresh_running(&self) {
        let running = self.states.any_active();
        if self.running.swap(running, Ordering::AcqRel) != running {
            self.events.emit(EngineEvent::StatusChange { running });
        }
    }

    pub(crate) fn mark_connected(&self, query: &Query, connected: bool) {
        let Some(state) = self.states.set_connected(&query.id, connected) else {
            return;
        };

        let notice = ConnectionNotice {
            query_id: query.id.clone(),
            display_name: query.display_name.clone(),
        };
        self.events.emit(if connected {
            EngineEvent::Connected(notice)
        } else {
            EngineEvent::Disconnected(notice)
        });
        self.emit_state(&query.id, state);
    }

    /// Terminal failure raised by the query's own connection task.
    pub(crate) fn fail_query(&self, query_id: &str, session: u64, reason: String) {
        {
            let mut connections = self.connections.lock();
            // No handle, or a newer one, means a stop or restart already took over.
            match connections.get(query_id).map(|handle| handle.session) {
                Some(current) if current == session => {
                    connections.remove(query_id);
                }
                _ => return,
            }
        }

        let previous = self.states.stop(query_id);
        self.events.emit(EngineEvent::QueryError(QueryErrorNotice {
            query_id: query_id.to_string(),
            reason: reason.clone(),
        }));
        self.events.log(
            LogLevel::Error,
            Some(query_id),
            format!("Query stopped: {reason}"),
        );
        if previous != QueryState::stopped() {
            self.emit_state(query_id, QueryState::stopped());
        }
        self.refresh_running();
    }

    /// Claims fresh tokens and hands them to a background task, so the feed keeps reading.
    pub(crate) fn dispatch(inner: &Arc<Self>, query_id: &str, tokens: Vec<ListingToken>) {
        let claimed = inner.claim_tokens(query_id, tokens);
        if claimed.is_empty() {
            return;
        }

        let inner = Arc::clone(inner);
        let query_id = query_id.to_string();
        tokio::spawn(inner.process_claimed(query_id, claimed));
    }

    fn claim_tokens(&self, query_id: &str, tokens: Vec<ListingToken>) -> Vec<ListingToken> {
        let now = Instant::now();
        let mut in_flight = self.in_flight.lock();
        let mut dedup = self.dedup.lock();

        let mut claimed = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !in_flight.try_claim(&token, now) {
                tracing::debug!(query = query_id, %token, "token already in flight");
                continue;
            }
            if dedup.has(&token) {
                tracing::debug!(query = query_id, %token, "token already processed");
                in_flight.release(&token, now);
                continue;
            }
            claimed.push(token);
        }
        claimed
    }

    fn release_tokens(&self, tokens: &[ListingToken]) {
        let now = Instant::now();
        let mut in_flight = self.in_flight.lock();
        for token in tokens {
            in_flight.release(token, now);
        }
    }

    async fn process_claimed(self: Arc<Self>, query_id: String, tokens: Vec<ListingToken>) {
        for batch in tokens.chunks(self.fetcher.batch_size()) {
            match self.fetcher.fetch(batch, &query_id).await {
                Ok(listings) => {
                    self.authorization_latched.store(false, Ordering::Release);
                    {
                        let mut dedup = self.dedup.lock();
                        for token in batch {
                            dedup.add(token);
                        }
                    }
                    for listing in listings {
                        self.process_listing(listing).await;
                    }
                }
                Err(error) if error.is_authorization() => {
                    tracing::debug!(query = %query_id, "lookup rejected: {error}");
                    self.raise_authorization_expired();
                }
                Err(error) => {
                    let reason = format!("listing lookup failed: {error}");
                    self.events.log(LogLevel::Error, Some(&query_id), reason.clone());
                    self.events.emit(EngineEvent::QueryError(QueryErrorNotice {
                        query_id: query_id.clone(),
                        reason,
                    }));
                }
            }
            self.release_tokens(batch);
        }
    }

    async fn process_listing(&self, listing: Listing) {
        {
            let mut dedup = self.dedup.lock();
            if dedup.has(&listing.claim_token) {
                tracing::debug!(query = %listing.query_id, token = %listing.token, "claim token already processed");
                return;
            }
            dedup.add(&listing.claim_token);
        }

        let query_id = listing.query_id.clone();
        let price = listing.price_label();
        self.events.emit(EngineEvent::ListingSeen(listing.clone()));

        match self.states.get(&query_id).status {
            QueryStatus::Stopped => {
                tracing::debug!(query = %query_id, "query stopped; listing not claimed");
                return;
            }
            QueryStatus::Paused => {
                self.events.log(
                    LogLevel::Info,
                    Some(&query_id),
                    format!("[PAUSED] {} - {price}", listing.item_name),
                );
                return;
            }
            QueryStatus::Running => {}
        }

        let stamp = match self.gate.try_acquire(Instant::now()) {
            Ok(stamp) => stamp,
            Err(remaining) => {
                self.events.log(
                    LogLevel::Warn,
                    Some(&query_id),
                    format!(
                        "SKIPPED {} - {price} (cooldown {}s remaining)",
                        listing.item_name,
                        remaining_secs(remaining)
                    ),
                );
                return;
            }
        };

        self.events.log(
            LogLevel::Info,
            Some(&query_id),
            format!(
                "Claiming {} - {price} from {}",
                listing.item_name, listing.account_name
            ),
        );
        let outcome = self.trigger.fire(&listing, stamp).await;

        match &outcome {
            ActionOutcome::Success { elapsed_ms } => {
                self.authorization_latched.store(false, Ordering::Release);
                self.events.log(
                    LogLevel::Success,
                    Some(&query_id),
                    format!("Claimed {} in {elapsed_ms}ms", listing.item_name),
                );
            }
            ActionOutcome::Failure {
                authorization: true,
                ..
            } => self.raise_authorization_expired(),
            ActionOutcome::Failure { reason, .. } => {
                self.events.log(
                    LogLevel::Error,
                    Some(&query_id),
                    format!("Claim failed for {}: {reason}", listing.item_name),
                );
                self.events.emit(EngineEvent::QueryError(QueryErrorNotice {
                    query_id: query_id.clone(),
                    reason: reason.clone(),
                }));
            }
        }

        self.events.emit(EngineEvent::ActionResult(ActionReport {
            query_id,
            item_name: listing.item_name,
            price,
            claim_token: listing.claim_token,
            outcome,
        }));
    }

    fn raise_authorization_expired(&self) {
        if self.authorization_latched.swap(true, Ordering::AcqRel) {
            return;
        }
        self.events.log(
            LogLevel::Error,
            None,
            "Session rejected by the marketplace; refresh credentials and restart",
        );
        self.events.emit(EngineEvent::AuthorizationExpired);
    }
}

/// Owns every query's connection plus the caches and gate they share.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig, transport: Arc<dyn MarketTransport>) -> (Self, EventReceiver) {
        let (events, receiver) = EventSink::channel();
        let gate = Arc::new(CooldownGate::new(Duration::from_millis(config.cooldown_ms)));
        let queries = config
            .queries
            .iter()
            .map(|query| (query.id.clone(), query.clone()))
            .collect();

        let inner = EngineInner {
            states: QueryStateStore::new(),
            queries: RwLock::new(queries),
            connections: Mutex::new(HashMap::new()),
            dedup: Mutex::new(DedupCache::new(config.dedup_capacity)),
            in_flight: Mutex::new(InFlightTracker::new(Duration::from_millis(
                config.in_flight_settle_ms,
            ))),
            fetcher: ListingFetcher::new(Arc::clone(&transport), config.fetch_batch_size),
            trigger: ActionTrigger::new(Arc::clone(&transport), Arc::clone(&gate)),
            gate,
            transport,
            events,
            sessions: AtomicU64::new(0),
            authorization_latched: AtomicBool::new(false),
            running: AtomicBool::new(false),
            config,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    fn registered(&self, query_id: &str) -> Result<Query, AppError> {
        self.inner
            .queries
            .read()
            .get(query_id)
            .cloned()
            .ok_or_else(|| AppError::UnknownQuery(query_id.to_string()))
    }

    pub fn queries(&self) -> Vec<Query> {
        self.inner.queries.read().values().cloned().collect()
    }

    /// Adds or replaces a query definition. Active queries keep their definition.
    pub fn register_query(&self, query: Query) -> bool {
        if self.inner.states.get(&query.id).status.is_active() {
            self.inner.events.log(
                LogLevel::Warn,
                Some(&query.id),
                "Cannot redefine a running query",
            );
            return false;
        }
        self.inner.queries.write().insert(query.id.clone(), query);
        true
    }

    pub fn remove_query(&self, query_id: &str) -> bool {
        if self.inner.states.get(query_id).status.is_active() {
            self.inner.events.log(
                LogLevel::Warn,
                Some(query_id),
                "Cannot remove a running query; stop it first",
            );
            return false;
        }
        self.inner.states.forget(query_id);
        self.inner.queries.write().remove(query_id).is_some()
    }

    pub fn start_query(&self, query_id: &str) -> Result<QueryState, AppError> {
        self.try_start(query_id).map(|(state, _)| state)
    }

    fn start_transitioned(&self, query_id: &str) -> bool {
        matches!(self.try_start(query_id), Ok((_, true)))
    }

    /// The flag is false when the query was already active and nothing changed.
    fn try_start(&self, query_id: &str) -> Result<(QueryState, bool), AppError> {
        let query = self.registered(query_id)?;
        let state = match self.inner.states.start(query_id) {
            Ok(state) => state,
            Err(current) => {
                self.inner.events.log(
                    LogLevel::Warn,
                    Some(query_id),
                    format!("Query already {}", current.status.as_str()),
                );
                return Ok((current, false));
            }
        };

        self.inner.emit_state(query_id, state);
        self.inner.events.log(
            LogLevel::Info,
            Some(query_id),
            format!("Starting {}", query.display_name),
        );
        self.spawn_connection(query);
        self.inner.refresh_running();
        Ok((state, true))
    }

    fn spawn_connection(&self, query: Query) {
        let session = self.inner.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let cancellation_token = CancellationToken::new();
        let query_id = query.id.clone();

        // Held across the spawn so a task failing fast still finds its own handle.
        let mut connections = self.inner.connections.lock();
        let join_handle = tokio::spawn(run_connection(
            Arc::clone(&self.inner),
            query,
            session,
            cancellation_token.clone(),
        ));
        let previous = connections.insert(
            query_id,
            ConnectionHandle {
                cancellation_token,
                join_handle,
                session,
            },
        );
        if let Some(previous) = previous {
            previous.cancellation_token.cancel();
        }
    }

    pub async fn stop_query(&self, query_id: &str) -> Result<QueryState, AppError> {
        self.registered(query_id)?;
        let previous = self.inner.states.stop(query_id);
        let handle = self.inner.connections.lock().remove(query_id);
        if let Some(handle) = handle {
            handle.cancellation_token.cancel();
            if let Err(error) = handle.join_handle.await {
                self.inner.events.log(
                    LogLevel::Warn,
                    Some(query_id),
                    format!("Connection task ended abnormally: {error}"),
                );
            }
        }

        if !previous.status.is_active() {
            self.inner
                .events
                .log(LogLevel::Warn, Some(query_id), "Query is not running");
            return Ok(QueryState::stopped());
        }

        self.inner.emit_state(query_id, QueryState::stopped());
        self.inner
            .events
            .emit(EngineEvent::Disconnected(self.inner.connection_notice(query_id)));
        self.inner.events.log(
            LogLevel::Info,
            Some(query_id),
            format!("Stopped {}", self.inner.display_name(query_id)),
        );
        self.inner.refresh_running();
        Ok(QueryState::stopped())
    }

    pub fn pause_query(&self, query_id: &str) -> Result<QueryState, AppError> {
        self.registered(query_id)?;
        match self.inner.states.pause(query_id) {
            Some(state) => {
                self.inner.emit_state(query_id, state);
                self.inner
                    .events
                    .log(LogLevel::Info, Some(query_id), "Paused; listings stay visible");
                Ok(state)
            }
            None => {
                let current = self.inner.states.get(query_id);
                self.inner.events.log(
                    LogLevel::Warn,
                    Some(query_id),
                    format!("Cannot pause: query is {}", current.status.as_str()),
                );
                Ok(current)
            }
        }
    }

    pub fn resume_query(&self, query_id: &str) -> Result<QueryState, AppError> {
        self.registered(query_id)?;
        match self.inner.states.resume(query_id) {
            Some(state) => {
                self.inner.emit_state(query_id, state);
                self.inner
                    .events
                    .log(LogLevel::Info, Some(query_id), "Resumed");
                Ok(state)
            }
            None => {
                let current = self.inner.states.get(query_id);
                self.inner.events.log(
                    LogLevel::Warn,
                    Some(query_id),
                    format!("Cannot resume: query is {}", current.status.as_str()),
                );
                Ok(current)
            }
        }
    }

    /// Reports only the queries this call actually moved; no-ops on lost races are left out.
    pub fn pause_all(&self) -> Vec<String> {
        let running = self.inner.states.ids_with_status(QueryStatus::Running);
        running
            .into_iter()
            .filter(|query_id| {
                self.pause_query(query_id)
                    .is_ok_and(|state| state.status == QueryStatus::Paused)
            })
            .collect()
    }

    pub fn resume_all(&self) -> Vec<String> {
        let paused = self.inner.states.ids_with_status(QueryStatus::Paused);
        paused
            .into_iter()
            .filter(|query_id| {
                self.resume_query(query_id)
                    .is_ok_and(|state| state.status == QueryStatus::Running)
            })
            .collect()
    }

    /// Starts every stopped query and re-arms the authorization alert.
    pub fn start_all(&self) -> Vec<String> {
        self.inner
            .authorization_latched
            .store(false, Ordering::Release);
        let stopped: Vec<String> = self
            .inner
            .queries
            .read()
            .keys()
            .filter(|query_id| self.inner.states.get(query_id).status == QueryStatus::Stopped)
            .cloned()
            .collect();

        stopped
            .into_iter()
            .filter(|query_id| self.start_transitioned(query_id))
            .collect()
    }

    /// Ordered shutdown: connections first, then caches, then the gate, then query states.
    pub async fn stop_all(&self) -> Vec<String> {
        let handles: Vec<(String, ConnectionHandle)> =
            self.inner.connections.lock().drain().collect();
        for (_, handle) in &handles {
            handle.cancellation_token.cancel();
        }
        for (query_id, handle) in handles {
            if let Err(error) = handle.join_handle.await {
                self.inner.events.log(
                    LogLevel::Warn,
                    Some(&query_id),
                    format!("Connection task ended abnormally: {error}"),
                );
            }
        }

        self.inner.dedup.lock().clear();
        self.inner.in_flight.lock().clear();
        self.inner.gate.reset();

        let stopped = self.inner.states.stop_all();
        for (query_id, _) in &stopped {
            self.inner.emit_state(query_id, QueryState::stopped());
            self.inner
                .events
                .emit(EngineEvent::Disconnected(self.inner.connection_notice(query_id)));
        }
        if !stopped.is_empty() {
            self.inner.events.log(
                LogLevel::Info,
                None,
                format!("Stopped {} queries", stopped.len()),
            );
        }
        self.inner.refresh_running();

        stopped.into_iter().map(|(query_id, _)| query_id).collect()
    }

    pub fn query_state(&self, query_id: &str) -> QueryState {
        self.inner.states.get(query_id)
    }

    /// Every registered query, including the ones that never started.
    pub fn all_query_states(&self) -> BTreeMap<String, QueryState> {
        let known = self.inner.states.snapshot();
        self.inner
            .queries
            .read()
            .keys()
            .map(|query_id| {
                let state = known.get(query_id).copied().unwrap_or_default();
                (query_id.clone(), state)
            })
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.inner.gate.remaining(Instant::now())
    }
}
