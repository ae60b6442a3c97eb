use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Cross-query cooldown between claim actions.
///
/// The slot is taken at decision time, before the claim request is awaited, so two listings
/// resolved a few milliseconds apart cannot both pass. A failed attempt that must not count
/// against the window gives the slot back through [`CooldownGate::rollback`].
#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    last_action: Mutex<Option<Instant>>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_action: Mutex::new(None),
        }
    }

    /// Returns the remaining wait when the window is still open.
    pub fn try_acquire(&self, now: Instant) -> Result<Instant, Duration> {
        let mut last_action = self.last_action.lock();
        if let Some(previous) = *last_action {
            let elapsed = now.saturating_duration_since(previous);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }
        *last_action = Some(now);
        Ok(now)
    }

    /// Clears the slot taken at `stamp`. A newer stamp is left untouched.
    pub fn rollback(&self, stamp: Instant) {
        let mut last_action = self.last_action.lock();
        if *last_action == Some(stamp) {
            *last_action = None;
        }
    }

    pub fn reset(&self) {
        *self.last_action.lock() = None;
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last_action = (*self.last_action.lock())?;
        let elapsed = now.saturating_duration_since(last_action);
        (elapsed < self.window).then(|| self.window - elapsed)
    }
}

/// Whole seconds left in the window, rounded up for operator-facing messages.
pub fn remaining_secs(remaining: Duration) -> u64 {
    let millis = remaining.as_millis().min(u64::MAX as u128) as u64;
    millis.div_ceil(1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_action_passes_and_blocks_followers_inside_window() {
        let gate = CooldownGate::new(Duration::from_millis(5_000));
        let start = Instant::now();

        assert!(gate.try_acquire(start).is_ok());
        let remaining = gate
            .try_acquire(start + Duration::from_millis(1_000))
            .expect_err("second action inside the window must be blocked");
        assert_eq!(remaining, Duration::from_millis(4_000));
        assert_eq!(remaining_secs(remaining), 4);

        assert!(gate.try_acquire(start + Duration::from_millis(6_000)).is_ok());
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let gate = CooldownGate::new(Duration::from_millis(5_000));
        let start = Instant::now();
        gate.try_acquire(start).expect("first action passes");

        assert!(gate.try_acquire(start + Duration::from_millis(5_000)).is_ok());
    }

    #[test]
    fn rollback_reopens_gate_immediately() {
        let gate = CooldownGate::new(Duration::from_millis(5_000));
        let start = Instant::now();
        let stamp = gate.try_acquire(start).expect("first action passes");

        gate.rollback(stamp);
        assert!(gate.remaining(start).is_none());
        assert!(gate.try_acquire(start + Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn stale_rollback_keeps_newer_slot() {
        let gate = CooldownGate::new(Duration::from_millis(100));
        let start = Instant::now();
        let old_stamp = gate.try_acquire(start).expect("first passes");
        let newer = start + Duration::from_millis(200);
        gate.try_acquire(newer).expect("second passes after window");

        gate.rollback(old_stamp);
        assert!(gate.remaining(newer + Duration::from_millis(10)).is_some());
    }

    #[test]
    fn zero_window_never_blocks() {
        let gate = CooldownGate::new(Duration::ZERO);
        let now = Instant::now();
        assert!(gate.try_acquire(now).is_ok());
        assert!(gate.try_acquire(now).is_ok());
    }

    #[test]
    fn rounds_remaining_seconds_up() {
        assert_eq!(remaining_secs(Duration::from_millis(1)), 1);
        assert_eq!(remaining_secs(Duration::from_millis(4_000)), 4);
        assert_eq!(remaining_secs(Duration::from_millis(4_001)), 5);
    }
}
