// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry decisions for printer refreshes and device setup.
//
// Two policies live here:
//   - `RefreshPolicy`: immediate, bounded in-cycle retry used by the update
//     coordinator. Only connection failures and timeouts are retried.
//   - `SetupBackoff`: exponential backoff with jitter between whole setup
//     attempts, used by the host when the mandatory first refresh fails.

use std::time::Duration;

use forgelink_core::config::MAX_FAILED_UPDATES;
use forgelink_core::error::ForgeError;
use forgelink_core::types::ErrorClass;
use tracing::{debug, warn};

/// Classify a `ForgeError` into an `ErrorClass` for retry decisions.
pub fn classify_error(err: &ForgeError) -> ErrorClass {
    match err {
        ForgeError::Connection(_) | ForgeError::Timeout(_) => ErrorClass::Transient,

        ForgeError::NotReady(_) | ForgeError::NoFileSelected => ErrorClass::UserAction,

        ForgeError::Protocol(_)
        | ForgeError::NotInitialized
        | ForgeError::ShutDown
        | ForgeError::Task(_)
        | ForgeError::Config(_)
        | ForgeError::Io(_)
        | ForgeError::Serialization(_) => ErrorClass::Permanent,
    }
}

/// What a refresh cycle should do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Re-run the fetch immediately, within the same cycle.
    RetryNow,
    /// Stop retrying; publish the device as unavailable.
    ReportFailure,
    /// Not ours to handle; the error leaves the cycle unchanged.
    Propagate,
}

/// Bounded immediate-retry policy for refresh cycles.
///
/// Stateless: the consecutive-failure counter is owned by the coordinator and
/// passed in. With `max_failed_updates = N` a cycle makes at most `N + 1`
/// fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub max_failed_updates: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_failed_updates: MAX_FAILED_UPDATES,
        }
    }
}

impl RefreshPolicy {
    pub fn new(max_failed_updates: u32) -> Self {
        Self { max_failed_updates }
    }

    /// Decide the next step given the error and the failures already absorbed
    /// in this cycle (before counting this one).
    pub fn decide(&self, err: &ForgeError, consecutive_failures: u32) -> RefreshDecision {
        match classify_error(err) {
            ErrorClass::Transient if consecutive_failures >= self.max_failed_updates => {
                warn!(
                    failures = consecutive_failures,
                    max = self.max_failed_updates,
                    error = %err,
                    "refresh failure limit reached"
                );
                RefreshDecision::ReportFailure
            }
            ErrorClass::Transient => {
                debug!(
                    attempt = consecutive_failures + 1,
                    error = %err,
                    "transient refresh failure, retrying now"
                );
                RefreshDecision::RetryNow
            }
            ErrorClass::UserAction | ErrorClass::Permanent => RefreshDecision::Propagate,
        }
    }
}

/// Backoff configuration for re-attempting device setup.
#[derive(Debug, Clone, Copy)]
pub struct SetupBackoff {
    /// Maximum number of setup attempts (including the first).
    pub max_attempts: u32,
    /// Base delay between attempts (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for SetupBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl SetupBackoff {
    /// Delay before setup attempt `attempt + 1`, or `None` when the error is
    /// not worth another attempt or the attempts are used up.
    pub fn next_delay(&self, err: &ForgeError, attempt: u32) -> Option<Duration> {
        if classify_error(err) != ErrorClass::Transient {
            return None;
        }
        if attempt + 1 >= self.max_attempts {
            warn!(attempt, max = self.max_attempts, "setup attempts exhausted");
            return None;
        }
        Some(self.compute_delay(attempt))
    }

    /// delay = min(base * 2^attempt + jitter, max_delay)
    fn compute_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
        let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
        Duration::from_millis(total_ms.min(self.max_delay.as_millis() as u64))
    }
}

/// Deterministic jitter in [0, base) spread by attempt number.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> ForgeError {
        ForgeError::Timeout("no reply in 5s".into())
    }

    #[test]
    fn transport_errors_are_transient() {
        assert_eq!(classify_error(&timeout()), ErrorClass::Transient);
        assert_eq!(
            classify_error(&ForgeError::Connection("refused".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn not_ready_needs_user_action() {
        let err = ForgeError::NotReady("BUILDING_FROM_SD".into());
        assert_eq!(classify_error(&err), ErrorClass::UserAction);
    }

    #[test]
    fn protocol_error_is_permanent() {
        let err = ForgeError::Protocol("unexpected reply to M119".into());
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn retries_until_threshold_then_reports() {
        let policy = RefreshPolicy::new(3);
        assert_eq!(policy.decide(&timeout(), 0), RefreshDecision::RetryNow);
        assert_eq!(policy.decide(&timeout(), 2), RefreshDecision::RetryNow);
        assert_eq!(policy.decide(&timeout(), 3), RefreshDecision::ReportFailure);
        assert_eq!(policy.decide(&timeout(), 7), RefreshDecision::ReportFailure);
    }

    #[test]
    fn zero_threshold_reports_first_failure() {
        let policy = RefreshPolicy::new(0);
        assert_eq!(policy.decide(&timeout(), 0), RefreshDecision::ReportFailure);
    }

    #[test]
    fn non_transient_errors_propagate() {
        let policy = RefreshPolicy::default();
        let err = ForgeError::Protocol("garbled".into());
        assert_eq!(policy.decide(&err, 0), RefreshDecision::Propagate);
    }

    #[test]
    fn setup_backoff_grows_and_caps() {
        let backoff = SetupBackoff {
            max_attempts: 20,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        };
        let d0 = backoff.next_delay(&timeout(), 0).unwrap();
        let d1 = backoff.next_delay(&timeout(), 1).unwrap();
        let d2 = backoff.next_delay(&timeout(), 2).unwrap();
        assert!(d1 > d0);
        assert!(d2 > d1);
        assert_eq!(backoff.next_delay(&timeout(), 15), Some(Duration::from_secs(30)));
    }

    #[test]
    fn setup_backoff_stops_on_permanent_or_exhaustion() {
        let backoff = SetupBackoff {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(backoff.next_delay(&ForgeError::Protocol("x".into()), 0).is_none());
        assert!(backoff.next_delay(&timeout(), 1).is_some());
        assert!(backoff.next_delay(&timeout(), 2).is_none());
    }
}
