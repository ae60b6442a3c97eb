use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Bounded record of tokens already acted on. Lookups and inserts both count as a touch;
/// once full, inserting a new token evicts the least-recently-touched one.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    clock: u64,
    stamps: HashMap<String, u64>,
    recency: BTreeMap<u64, String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            stamps: HashMap::new(),
            recency: BTreeMap::new(),
        }
    }

    pub fn has(&mut self, token: &str) -> bool {
        if !self.stamps.contains_key(token) {
            return false;
        }
        self.touch(token);
        true
    }

    pub fn add(&mut self, token: &str) {
        if self.stamps.contains_key(token) {
            self.touch(token);
            return;
        }

        while self.stamps.len() >= self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.stamps.remove(&oldest);
        }

        let stamp = self.next_stamp();
        self.stamps.insert(token.to_string(), stamp);
        self.recency.insert(stamp, token.to_string());
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
        self.recency.clear();
        self.clock = 0;
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    fn touch(&mut self, token: &str) {
        let stamp = self.next_stamp();
        if let Some(previous) = self.stamps.insert(token.to_string(), stamp) {
            self.recency.remove(&previous);
        }
        self.recency.insert(stamp, token.to_string());
    }

    fn next_stamp(&mut self) -> u64 {
        self.clock = self.clock.saturating_add(1);
        self.clock
    }
}

/// Tokens currently being fetched or processed. A released token stays claimed until the
/// settle window elapses so a late second delivery of the same token is still rejected.
#[derive(Debug)]
pub struct InFlightTracker {
    settle: Duration,
    entries: HashMap<String, Option<Instant>>,
}

impl InFlightTracker {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            entries: HashMap::new(),
        }
    }

    pub fn try_claim(&mut self, token: &str, now: Instant) -> bool {
        self.purge_settled(now);
        if self.entries.contains_key(token) {
            return false;
        }
        self.entries.insert(token.to_string(), None);
        true
    }

    pub fn release(&mut self, token: &str, now: Instant) {
        if let Some(expiry) = self.entries.get_mut(token) {
            *expiry = Some(now + self.settle);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn purge_settled(&mut self, now: Instant) {
        self.entries.retain(|_, expiry| match expiry {
            Some(expiry) => *expiry > now,
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_added_at_capacity() {
        let mut cache = DedupCache::new(2);
        cache.add("a");
        cache.add("b");
        cache.add("c");

        assert_eq!(cache.len(), 2);
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
        assert!(cache.has("c"));
    }

    #[test]
    fn lookup_refreshes_recency() {
        let mut cache = DedupCache::new(2);
        cache.add("a");
        cache.add("b");
        assert!(cache.has("a"));
        cache.add("c");

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
    }

    #[test]
    fn re_adding_existing_key_refreshes_without_growing() {
        let mut cache = DedupCache::new(2);
        cache.add("a");
        cache.add("b");
        cache.add("a");
        assert_eq!(cache.len(), 2);

        cache.add("c");
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
    }

    #[test]
    fn never_exceeds_capacity_under_churn() {
        let mut cache = DedupCache::new(64);
        for index in 0..1_000 {
            cache.add(&format!("token-{index}"));
            assert!(cache.len() <= 64);
        }
        assert!(!cache.has("token-935"));
        assert!(cache.has("token-936"));
        assert!(cache.has("token-999"));
    }

    #[test]
    fn clear_empties_cache() {
        let mut cache = DedupCache::new(4);
        cache.add("a");
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.has("a"));
    }

    #[test]
    fn claims_token_only_once_while_in_flight() {
        let mut tracker = InFlightTracker::new(Duration::from_secs(5));
        let now = Instant::now();

        assert!(tracker.try_claim("abc", now));
        assert!(!tracker.try_claim("abc", now));
        assert!(tracker.try_claim("def", now));
    }

    #[test]
    fn released_token_stays_claimed_until_settle_window_passes() {
        let mut tracker = InFlightTracker::new(Duration::from_secs(5));
        let start = Instant::now();

        assert!(tracker.try_claim("abc", start));
        tracker.release("abc", start);

        assert!(!tracker.try_claim("abc", start + Duration::from_millis(4_999)));
        assert!(tracker.try_claim("abc", start + Duration::from_millis(5_000)));
    }

    #[test]
    fn purges_settled_entries_on_claim() {
        let mut tracker = InFlightTracker::new(Duration::from_millis(10));
        let start = Instant::now();
        for index in 0..50 {
            let token = format!("t{index}");
            tracker.try_claim(&token, start);
            tracker.release(&token, start);
        }

        tracker.try_claim("fresh", start + Duration::from_millis(11));
        assert_eq!(tracker.len(), 1);
    }
}
