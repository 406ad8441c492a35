//! Device health monitor.
//!
//! Owns the connectivity belief about the device. The record changes only
//! through [`DeviceMonitor::test`] (one probe per call) and
//! [`DeviceMonitor::reset`]. The lock is never held while probing; a probe
//! that straddles a reset is discarded instead of overwriting the fresh
//! UNKNOWN state.

use crate::probe::DeviceProbe;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_common::{
    HealthPolicy, HealthRecord, HealthSnapshot, HealthTimeline, HealthTimelineEntry, OperatingMode,
};

/// What to probe, read from the active configuration
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub mode: OperatingMode,
    /// `None` when host or port is not configured
    pub address: Option<String>,
}

struct MonitorState {
    record: HealthRecord,
    /// Bumped on every reset
    generation: u64,
}

pub struct DeviceMonitor {
    state: Mutex<MonitorState>,
    timeline: HealthTimeline,
    probe: Arc<dyn DeviceProbe>,
}

impl DeviceMonitor {
    pub fn new(policy: HealthPolicy, timeline: HealthTimeline, probe: Arc<dyn DeviceProbe>) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                record: HealthRecord::new(policy),
                generation: 0,
            }),
            timeline,
            probe,
        }
    }

    /// Current belief, no I/O
    pub fn snapshot(&self) -> HealthSnapshot {
        self.lock().record.snapshot()
    }

    pub fn timeline(&self) -> &HealthTimeline {
        &self.timeline
    }

    /// Run exactly one probe and commit its result.
    ///
    /// Mock mode succeeds without touching the network.
    pub fn test(&self, target: &ProbeTarget, timeout: Duration) -> HealthSnapshot {
        let generation = self.lock().generation;

        let outcome = if target.mode.is_simulated() {
            debug!("[MONITOR] Mock mode, skipping network probe");
            Ok(())
        } else {
            match &target.address {
                Some(address) => self.probe.probe(address, timeout),
                None => Err("device address not configured".to_string()),
            }
        };

        let now = Utc::now();
        let (snapshot, transition) = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!("[MONITOR] Discarding probe result from before a reset");
                return state.record.snapshot();
            }
            let transition = match &outcome {
                Ok(()) => state.record.record_success(now),
                Err(e) => state.record.record_failure(now, e),
            };
            (state.record.snapshot(), transition)
        };

        match &outcome {
            Ok(()) => debug!("[MONITOR] Device reachable"),
            Err(e) => warn!(
                "[MONITOR] Device probe failed ({} consecutive): {}",
                snapshot.consecutive_failures, e
            ),
        }
        if let Some(entry) = transition {
            self.record_transition(&entry);
        }
        snapshot
    }

    /// Return to UNKNOWN, dropping any probe still in flight
    pub fn reset(&self, reason: &str) -> HealthSnapshot {
        if let Some(entry) = self.reset_state(reason) {
            self.record_transition(&entry);
        }
        self.snapshot()
    }

    /// Reset in memory only; the caller records the returned transition
    /// once it has released its own locks.
    pub(crate) fn reset_state(&self, reason: &str) -> Option<HealthTimelineEntry> {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        state.record.reset(Utc::now(), reason)
    }

    pub(crate) fn record_transition(&self, entry: &HealthTimelineEntry) {
        info!(
            "[MONITOR] Health -> {} (failures: {})",
            entry.state, entry.failure_count
        );
        if let Err(e) = self.timeline.append(entry) {
            warn!("[MONITOR] Failed to append health timeline: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
