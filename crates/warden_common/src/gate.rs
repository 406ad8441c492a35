//! Write gate: may a control mutation reach the device?
//!
//! Pure function of (mode, health). Every mutating entry point calls it,
//! not only the dashboard, so a stale client cannot push writes to a device
//! the server already believes is gone.

use crate::health::HealthState;
use crate::mode::OperatingMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    /// Empty when allowed
    pub reason: String,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
        }
    }
}

pub fn allowed(mode: OperatingMode, health: HealthState) -> GateDecision {
    match (mode, health) {
        (OperatingMode::Mock, _) => GateDecision::allow(),
        (OperatingMode::Live, HealthState::Disconnected) => GateDecision::deny(
            "device is disconnected; run a connectivity test and confirm the device is reachable before sending commands",
        ),
        (OperatingMode::Live, HealthState::Unknown | HealthState::Ok | HealthState::Degraded) => {
            GateDecision::allow()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [HealthState; 4] = [
        HealthState::Unknown,
        HealthState::Ok,
        HealthState::Degraded,
        HealthState::Disconnected,
    ];

    #[test]
    fn test_mock_always_allows() {
        for state in ALL_STATES {
            assert_eq!(
                allowed(OperatingMode::Mock, state),
                GateDecision {
                    allowed: true,
                    reason: String::new()
                }
            );
        }
    }

    #[test]
    fn test_live_denies_only_disconnected() {
        for state in ALL_STATES {
            let decision = allowed(OperatingMode::Live, state);
            if state == HealthState::Disconnected {
                assert!(!decision.allowed);
                assert!(!decision.reason.is_empty());
            } else {
                assert!(decision.allowed, "{state} should be allowed");
                assert!(decision.reason.is_empty());
            }
        }
    }
}
