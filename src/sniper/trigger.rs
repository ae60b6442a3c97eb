use crate::sniper::events::ActionOutcome;
use crate::sniper::gate::CooldownGate;
use crate::sniper::transport::MarketTransport;
use crate::sniper::types::Listing;
use std::sync::Arc;
use tokio::time::Instant;

/// Sends the claim request for one listing and classifies the result.
///
/// The caller acquires the cooldown slot first and hands over its stamp; an authorization
/// failure gives that slot back so the next listing is not blocked by a request that never
/// counted.
pub struct ActionTrigger {
    transport: Arc<dyn MarketTransport>,
    gate: Arc<CooldownGate>,
}

impl ActionTrigger {
    pub fn new(transport: Arc<dyn MarketTransport>, gate: Arc<CooldownGate>) -> Self {
        Self { transport, gate }
    }

    pub async fn fire(&self, listing: &Listing, stamp: Instant) -> ActionOutcome {
        let started_at = Instant::now();
        match self.transport.claim(&listing.claim_token).await {
            Ok(()) => ActionOutcome::Success {
                elapsed_ms: started_at.elapsed().as_millis().min(u64::MAX as u128) as u64,
            },
            Err(error) if error.is_authorization() => {
                self.gate.rollback(stamp);
                ActionOutcome::Failure {
                    reason: error.to_string(),
                    authorization: true,
                }
            }
            Err(error) => ActionOutcome::Failure {
                reason: error.to_string(),
                authorization: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::sniper::test_support::{sample_listing, MockTransport};
    use std::time::Duration;

    fn trigger_with(transport: Arc<MockTransport>) -> (ActionTrigger, Arc<CooldownGate>) {
        let gate = Arc::new(CooldownGate::new(Duration::from_millis(5_000)));
        (ActionTrigger::new(transport, Arc::clone(&gate)), gate)
    }

    #[tokio::test(start_paused = true)]
    async fn success_reports_elapsed_and_keeps_slot() {
        let transport = Arc::new(MockTransport::new());
        transport.set_claim_latency(Duration::from_millis(40));
        let (trigger, gate) = trigger_with(transport.clone());

        let stamp = gate.try_acquire(Instant::now()).expect("gate open");
        let outcome = trigger.fire(&sample_listing("q1", "abc"), stamp).await;

        assert_eq!(outcome, ActionOutcome::Success { elapsed_ms: 40 });
        assert!(gate.remaining(Instant::now()).is_some());
        assert_eq!(transport.claim_calls(), vec!["claim-abc".to_string()]);
    }

    #[tokio::test]
    async fn authorization_failure_rolls_back_cooldown() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_claim(AppError::AuthorizationExpired { status: 401 });
        let (trigger, gate) = trigger_with(transport);

        let stamp = gate.try_acquire(Instant::now()).expect("gate open");
        let outcome = trigger.fire(&sample_listing("q1", "abc"), stamp).await;

        assert!(matches!(
            outcome,
            ActionOutcome::Failure {
                authorization: true,
                ..
            }
        ));
        assert!(gate.try_acquire(Instant::now()).is_ok());
    }

    #[tokio::test]
    async fn other_failures_keep_the_slot() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_claim(AppError::Upstream {
            status: 429,
            body: "rate limited".to_string(),
        });
        let (trigger, gate) = trigger_with(transport);

        let stamp = gate.try_acquire(Instant::now()).expect("gate open");
        let outcome = trigger.fire(&sample_listing("q1", "abc"), stamp).await;

        assert!(matches!(
            outcome,
            ActionOutcome::Failure {
                authorization: false,
                ..
            }
        ));
        assert!(gate.try_acquire(Instant::now()).is_err());
    }
}
