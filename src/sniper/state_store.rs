use crate::sniper::types::{QueryState, QueryStatus};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Per-query status and connectivity. Transitions are checked here so that racing control
/// calls resolve to either a transition or a no-op, never an invalid state.
#[derive(Debug, Default)]
pub struct QueryStateStore {
    states: RwLock<HashMap<String, QueryState>>,
}

impl QueryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, query_id: &str) -> QueryState {
        self.states
            .read()
            .get(query_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, QueryState> {
        self.states
            .read()
            .iter()
            .map(|(query_id, state)| (query_id.clone(), *state))
            .collect()
    }

    /// Stopped -> Running. Returns the current state unchanged when already active.
    pub fn start(&self, query_id: &str) -> Result<QueryState, QueryState> {
        let mut states = self.states.write();
        let entry = states.entry(query_id.to_string()).or_default();
        if entry.status.is_active() {
            return Err(*entry);
        }
        *entry = QueryState::running();
        Ok(*entry)
    }

    pub fn pause(&self, query_id: &str) -> Option<QueryState> {
        self.transition(query_id, QueryStatus::Running, QueryStatus::Paused)
    }

    pub fn resume(&self, query_id: &str) -> Option<QueryState> {
        self.transition(query_id, QueryStatus::Paused, QueryStatus::Running)
    }

    /// Any state -> Stopped. Returns the state that was replaced.
    pub fn stop(&self, query_id: &str) -> QueryState {
        let mut states = self.states.write();
        let entry = states.entry(query_id.to_string()).or_default();
        std::mem::replace(entry, QueryState::stopped())
    }

    pub fn stop_all(&self) -> Vec<(String, QueryState)> {
        let mut states = self.states.write();
        let mut replaced: Vec<(String, QueryState)> = states
            .iter_mut()
            .filter(|(_, state)| state.status.is_active() || state.connected)
            .map(|(query_id, state)| {
                (
                    query_id.clone(),
                    std::mem::replace(state, QueryState::stopped()),
                )
            })
            .collect();
        replaced.sort_by(|left, right| left.0.cmp(&right.0));
        replaced
    }

    /// Connectivity never changes `status`, and a stopped query is never marked connected.
    pub fn set_connected(&self, query_id: &str, connected: bool) -> Option<QueryState> {
        let mut states = self.states.write();
        let state = states.get_mut(query_id)?;
        if connected && !state.status.is_active() {
            return None;
        }
        if state.connected == connected {
            return None;
        }
        state.connected = connected;
        Some(*state)
    }

    pub fn any_active(&self) -> bool {
        self.states
            .read()
            .values()
            .any(|state| state.status.is_active())
    }

    pub fn ids_with_status(&self, status: QueryStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .states
            .read()
            .iter()
            .filter(|(_, state)| state.status == status)
            .map(|(query_id, _)| query_id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn forget(&self, query_id: &str) {
        self.states.write().remove(query_id);
    }

    fn transition(
        &self,
        query_id: &str,
        from: QueryStatus,
        to: QueryStatus,
    ) -> Option<QueryState> {
        let mut states = self.states.write();
        let state = states.get_mut(query_id)?;
        if state.status != from {
            return None;
        }
        state.status = to;
        Some(*state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_query_reads_as_stopped() {
        let store = QueryStateStore::new();
        assert_eq!(store.get("missing"), QueryState::stopped());
    }

    #[test]
    fn start_is_idempotent_for_active_queries() {
        let store = QueryStateStore::new();
        assert_eq!(store.start("q1"), Ok(QueryState::running()));
        assert_eq!(store.start("q1"), Err(QueryState::running()));

        store.pause("q1");
        assert!(store.start("q1").is_err());
    }

    #[test]
    fn pause_and_resume_only_from_matching_state() {
        let store = QueryStateStore::new();
        assert!(store.pause("q1").is_none());

        store.start("q1").expect("stopped query starts");
        assert!(store.resume("q1").is_none());
        assert_eq!(
            store.pause("q1").map(|state| state.status),
            Some(QueryStatus::Paused)
        );
        assert!(store.pause("q1").is_none());
        assert_eq!(
            store.resume("q1").map(|state| state.status),
            Some(QueryStatus::Running)
        );
    }

    #[test]
    fn connectivity_keeps_status_and_respects_stopped() {
        let store = QueryStateStore::new();
        store.start("q1").expect("starts");
        store.pause("q1");

        let state = store.set_connected("q1", true).expect("connects");
        assert_eq!(state.status, QueryStatus::Paused);
        assert!(state.connected);

        let previous = store.stop("q1");
        assert!(previous.connected);
        assert!(store.set_connected("q1", true).is_none());
        assert!(!store.get("q1").connected);
    }

    #[test]
    fn stop_all_reports_only_active_queries() {
        let store = QueryStateStore::new();
        store.start("b").expect("starts");
        store.start("a").expect("starts");
        store.start("c").expect("starts");
        store.stop("c");

        let replaced = store.stop_all();
        let ids: Vec<&str> = replaced.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!store.any_active());
    }
}
