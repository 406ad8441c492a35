//! Device connectivity health state machine.
//!
//! The state is derived from the consecutive failure count only:
//! 0 is OK, anything below the disconnect threshold is DEGRADED, and the
//! threshold or above is DISCONNECTED. UNKNOWN exists until the first probe
//! and again after a configuration change resets the record.

use crate::timeline::HealthTimelineEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failures needed before the device is considered disconnected
pub const DEFAULT_DISCONNECT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Unknown,
    Ok,
    Degraded,
    Disconnected,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Ok => "OK",
            Self::Degraded => "DEGRADED",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escalation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub disconnect_threshold: u32,
}

impl HealthPolicy {
    pub fn new(disconnect_threshold: u32) -> Self {
        Self {
            disconnect_threshold: disconnect_threshold.max(1),
        }
    }

    /// State for a given failure count
    pub fn state_for(&self, consecutive_failures: u32) -> HealthState {
        if consecutive_failures == 0 {
            HealthState::Ok
        } else if consecutive_failures >= self.disconnect_threshold {
            HealthState::Disconnected
        } else {
            HealthState::Degraded
        }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DISCONNECT_THRESHOLD)
    }
}

/// Point-in-time view of device health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_test_at: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    fn unknown() -> Self {
        Self {
            state: HealthState::Unknown,
            consecutive_failures: 0,
            last_ok_at: None,
            last_error: None,
            last_test_at: None,
        }
    }
}

/// Mutable health record.
///
/// Every mutator returns a timeline entry when (and only when) the state
/// changed.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    current: HealthSnapshot,
    policy: HealthPolicy,
}

impl HealthRecord {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            current: HealthSnapshot::unknown(),
            policy,
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.current.clone()
    }

    pub fn state(&self) -> HealthState {
        self.current.state
    }

    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    /// Record a successful probe
    pub fn record_success(&mut self, at: DateTime<Utc>) -> Option<HealthTimelineEntry> {
        let previous = self.current.state;
        self.current.consecutive_failures = 0;
        self.current.state = self.policy.state_for(0);
        self.current.last_ok_at = Some(at);
        self.current.last_test_at = Some(at);
        self.current.last_error = None;
        self.transition_from(previous, at)
    }

    /// Record a failed probe
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: &str) -> Option<HealthTimelineEntry> {
        let previous = self.current.state;
        self.current.consecutive_failures = self.current.consecutive_failures.saturating_add(1);
        self.current.state = self.policy.state_for(self.current.consecutive_failures);
        self.current.last_test_at = Some(at);
        self.current.last_error = Some(error.to_string());
        self.transition_from(previous, at)
    }

    /// Forget everything learned so far; state returns to UNKNOWN
    pub fn reset(&mut self, at: DateTime<Utc>, reason: &str) -> Option<HealthTimelineEntry> {
        let previous = self.current.state;
        self.current = HealthSnapshot::unknown();
        if previous == HealthState::Unknown {
            return None;
        }
        Some(HealthTimelineEntry {
            timestamp: at,
            state: HealthState::Unknown,
            failure_count: 0,
            last_error: Some(reason.to_string()),
        })
    }

    fn transition_from(&self, previous: HealthState, at: DateTime<Utc>) -> Option<HealthTimelineEntry> {
        if previous == self.current.state {
            return None;
        }
        Some(HealthTimelineEntry {
            timestamp: at,
            state: self.current.state,
            failure_count: self.current.consecutive_failures,
            last_error: self.current.last_error.clone(),
        })
    }
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::new(HealthPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unknown() {
        let record = HealthRecord::default();
        assert_eq!(record.state(), HealthState::Unknown);
        assert_eq!(record.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_failures_increase_and_success_resets() {
        let mut record = HealthRecord::default();
        let now = Utc::now();

        for expected in 1..=7 {
            record.record_failure(now, "connection refused");
            assert_eq!(record.snapshot().consecutive_failures, expected);
        }

        record.record_success(now);
        let snap = record.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.state, HealthState::Ok);
        assert_eq!(snap.last_error, None);
        assert_eq!(snap.last_ok_at, Some(now));
    }

    #[test]
    fn test_state_is_function_of_failures() {
        let mut record = HealthRecord::default();
        let now = Utc::now();
        // Mixed history; state must only depend on the current count
        let history = [false, true, false, false, true, false, false, false, false, true, false];
        for ok in history {
            if ok {
                record.record_success(now);
            } else {
                record.record_failure(now, "timeout");
            }
            let snap = record.snapshot();
            let expected = match snap.consecutive_failures {
                0 => HealthState::Ok,
                1 | 2 => HealthState::Degraded,
                _ => HealthState::Disconnected,
            };
            assert_eq!(snap.state, expected);
        }
    }

    #[test]
    fn test_transitions_only_on_state_change() {
        let mut record = HealthRecord::default();
        let now = Utc::now();

        let first = record.record_failure(now, "refused").unwrap();
        assert_eq!(first.state, HealthState::Degraded);
        assert!(record.record_failure(now, "refused").is_none());
        let third = record.record_failure(now, "refused").unwrap();
        assert_eq!(third.state, HealthState::Disconnected);
        assert_eq!(third.failure_count, 3);
        assert!(record.record_failure(now, "refused").is_none());

        let back = record.record_success(now).unwrap();
        assert_eq!(back.state, HealthState::Ok);
        assert!(record.record_success(now).is_none());
    }

    #[test]
    fn test_custom_threshold() {
        let policy = HealthPolicy::new(5);
        assert_eq!(policy.state_for(4), HealthState::Degraded);
        assert_eq!(policy.state_for(5), HealthState::Disconnected);
        // Zero would make every failure count as "no failures"
        assert_eq!(HealthPolicy::new(0).disconnect_threshold, 1);
    }

    #[test]
    fn test_reset_returns_to_unknown() {
        let mut record = HealthRecord::default();
        let now = Utc::now();
        record.record_failure(now, "refused");

        let entry = record.reset(now, "configuration changed").unwrap();
        assert_eq!(entry.state, HealthState::Unknown);
        assert_eq!(record.state(), HealthState::Unknown);
        assert_eq!(record.snapshot().consecutive_failures, 0);

        // Already unknown: no transition
        assert!(record.reset(now, "again").is_none());
    }
}
