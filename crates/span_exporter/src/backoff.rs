//! Backoff Policy - Retry Gating After Failed Deliveries
//!
//! A pure state machine: it never sleeps and never spawns. The delivery worker
//! feeds it the outcome of every attempt and asks [`BackoffPolicy::is_eligible`]
//! before starting the next one.
//!
//! ```text
//!   Success            ──► interval = base (usually 0), stamp last attempt
//!   TransientFailure   ──► interval = clamp(interval == 0 ? floor : interval * 2,
//!                                           floor, ceiling), stamp last attempt
//!   PermanentFailure   ──► unchanged
//! ```

use crate::client::DeliveryOutcome;
use crate::error::ExportError;
#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_backoff_capped, debug_assert_backoff_non_decreasing};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for backoff behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Interval after a successful delivery (zero = immediately eligible).
    pub base: Duration,
    /// Interval after the first failure from a zero interval.
    pub floor: Duration,
    /// Upper bound on the interval.
    pub ceiling: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::ZERO,
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(300),
        }
    }
}

impl BackoffConfig {
    /// Checks `floor > 0`, `floor <= ceiling` and `base <= ceiling`.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.floor.is_zero() {
            return Err(ExportError::Config(
                "backoff floor must be greater than zero".into(),
            ));
        }
        if self.floor > self.ceiling {
            return Err(ExportError::Config(format!(
                "backoff floor {:?} exceeds ceiling {:?}",
                self.floor, self.ceiling
            )));
        }
        if self.base > self.ceiling {
            return Err(ExportError::Config(format!(
                "backoff base {:?} exceeds ceiling {:?}",
                self.base, self.ceiling
            )));
        }
        Ok(())
    }
}

/// Snapshot of the policy's mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    /// Delay that must elapse after `last_attempt` before the next attempt.
    pub current_interval: Duration,
    /// When the most recent success or transient failure was recorded.
    pub last_attempt: Option<Instant>,
}

/// Computes retry delays from delivery outcomes.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    state: BackoffState,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            state: BackoffState {
                current_interval: config.base,
                last_attempt: None,
            },
        }
    }

    /// Consumes the outcome of the most recent attempt and returns the delay
    /// before the next one is permitted.
    pub fn next_interval(&mut self, outcome: &DeliveryOutcome) -> Duration {
        match outcome {
            DeliveryOutcome::Success => {
                self.state.current_interval = self.config.base;
                self.state.last_attempt = Some(Instant::now());
            }
            DeliveryOutcome::TransientFailure(_) => {
                let previous = self.state.current_interval;
                let next = if previous.is_zero() {
                    self.config.floor
                } else {
                    previous.saturating_mul(2)
                };
                let next = next.max(self.config.floor).min(self.config.ceiling);

                #[cfg(debug_assertions)]
                debug_assert_backoff_non_decreasing!(previous, next, self.config.ceiling);
                #[cfg(debug_assertions)]
                debug_assert_backoff_capped!(next, self.config.ceiling);

                self.state.current_interval = next;
                self.state.last_attempt = Some(Instant::now());
            }
            // Not a timing problem; the caller drops the batch.
            DeliveryOutcome::PermanentFailure(_) => {}
        }
        self.state.current_interval
    }

    /// Whether enough time has passed since the last attempt to try again.
    pub fn is_eligible(&self, now: Instant) -> bool {
        match self.eligible_at() {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// The instant the next attempt becomes eligible, if one has been recorded.
    pub fn eligible_at(&self) -> Option<Instant> {
        self.state
            .last_attempt
            .map(|at| at + self.state.current_interval)
    }

    /// Returns `true` while a non-zero interval is running or pending.
    pub fn is_backing_off(&self) -> bool {
        self.state.current_interval > self.config.base
    }

    pub fn current_interval(&self) -> Duration {
        self.state.current_interval
    }

    pub fn state(&self) -> BackoffState {
        self.state
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;

    fn transient() -> DeliveryOutcome {
        DeliveryOutcome::TransientFailure(DeliveryError::Transport("connection refused".into()))
    }

    fn permanent() -> DeliveryOutcome {
        DeliveryOutcome::PermanentFailure(DeliveryError::Serialization("bad".into()))
    }

    fn config() -> BackoffConfig {
        BackoffConfig {
            base: Duration::ZERO,
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_policy_is_eligible() {
        let policy = BackoffPolicy::new(config());
        assert!(policy.is_eligible(Instant::now()));
        assert_eq!(policy.eligible_at(), None);
        assert_eq!(policy.current_interval(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_sets_floor_then_doubles_to_ceiling() {
        let mut policy = BackoffPolicy::new(config());

        let intervals: Vec<u64> = (0..6)
            .map(|_| policy.next_interval(&transient()).as_secs())
            .collect();

        assert_eq!(intervals, vec![1, 2, 4, 8, 10, 10]);
        assert!(intervals.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_to_base() {
        let mut policy = BackoffPolicy::new(config());
        policy.next_interval(&transient());
        policy.next_interval(&transient());
        assert_eq!(policy.current_interval(), Duration::from_secs(2));

        assert_eq!(policy.next_interval(&DeliveryOutcome::Success), Duration::ZERO);
        assert!(!policy.is_backing_off());
        assert!(policy.is_eligible(Instant::now()));

        // Next failure starts from the floor again
        assert_eq!(policy.next_interval(&transient()), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_leaves_state_unchanged() {
        let mut policy = BackoffPolicy::new(config());
        policy.next_interval(&transient());
        let before = policy.state();

        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(policy.next_interval(&permanent()), Duration::from_secs(1));
        assert_eq!(policy.state(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eligibility_follows_interval() {
        let mut policy = BackoffPolicy::new(config());
        policy.next_interval(&transient());
        policy.next_interval(&transient()); // 2s

        assert!(!policy.is_eligible(Instant::now()));
        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert!(!policy.is_eligible(Instant::now()));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(policy.is_eligible(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_zero_base() {
        let mut policy = BackoffPolicy::new(BackoffConfig {
            base: Duration::from_millis(200),
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(4),
        });
        assert_eq!(policy.current_interval(), Duration::from_millis(200));
        // Doubling 200ms is below the floor, so the floor wins
        assert_eq!(policy.next_interval(&transient()), Duration::from_secs(1));
        assert_eq!(policy.next_interval(&transient()), Duration::from_secs(2));
        assert_eq!(
            policy.next_interval(&DeliveryOutcome::Success),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());
        assert!(matches!(
            BackoffConfig { floor: Duration::ZERO, ..config() }.validate(),
            Err(ExportError::Config(_))
        ));
        assert!(BackoffConfig { ceiling: Duration::from_millis(500), ..config() }
            .validate()
            .is_err());
        assert!(BackoffConfig { base: Duration::from_secs(11), ..config() }
            .validate()
            .is_err());
    }
}
