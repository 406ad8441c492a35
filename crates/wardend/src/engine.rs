//! Engine core.
//!
//! Holds the active configuration snapshot, the validation record, the
//! device monitor and the live control values behind one cloneable handle.
//! Each concern has its own lock and none is held across device I/O.
//!
//! Lock order when more than one is needed: validation, then config.

use crate::monitor::{DeviceMonitor, ProbeTarget};
use crate::probe::{ControlSink, DeviceProbe};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use warden_common::api::ModeStatus;
use warden_common::{
    allowed, ConfigSnapshot, HealthPolicy, HealthSnapshot, HealthState, HealthTimeline,
    HealthTimelineEntry, RestartSignal, StatePaths,
};

/// Why a control write was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("value for '{0}' must be a finite number")]
    InvalidValue(String),

    #[error("control '{0}' is not writable")]
    NotWritable(String),

    #[error("{0}")]
    Blocked(String),

    #[error("device address not configured")]
    NoAddress,

    #[error("device write failed: {0}")]
    Device(String),
}

/// A confirmed connectivity test for one device signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    pub validated_at: DateTime<Utc>,
    pub config_signature: String,
}

#[derive(Debug, Default)]
struct ValidationState {
    record: Option<ValidationRecord>,
    config_changed: bool,
}

/// What [`Engine::apply`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub device_changed: bool,
    pub validation_cleared: bool,
    pub restart_requested: bool,
    pub changes: Vec<String>,
}

/// Result of [`Engine::test_device`]
#[derive(Debug, Clone)]
pub struct DeviceTestOutcome {
    pub health: HealthSnapshot,
    pub validated: bool,
}

struct EngineInner {
    config: RwLock<Arc<ConfigSnapshot>>,
    validation: Mutex<ValidationState>,
    controls: Mutex<HashMap<String, f64>>,
    monitor: DeviceMonitor,
    restart: RestartSignal,
    sink: Arc<dyn ControlSink>,
    started_at: Instant,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Refuses to start on an empty allowlist
    pub fn new(
        snapshot: ConfigSnapshot,
        paths: &StatePaths,
        probe: Arc<dyn DeviceProbe>,
        sink: Arc<dyn ControlSink>,
    ) -> warden_common::Result<Self> {
        snapshot.ensure_startable()?;

        let policy = HealthPolicy::new(snapshot.engine.disconnect_threshold);
        let timeline = HealthTimeline::new(paths.timeline(), snapshot.engine.timeline_max_entries);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config: RwLock::new(Arc::new(snapshot)),
                validation: Mutex::new(ValidationState::default()),
                controls: Mutex::new(HashMap::new()),
                monitor: DeviceMonitor::new(policy, timeline, probe),
                restart: RestartSignal::new(paths.restart_request()),
                sink,
                started_at: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> Arc<ConfigSnapshot> {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.inner.monitor.snapshot()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    pub fn mode_status(&self) -> ModeStatus {
        let validation = self.validation();
        let config = self.config();
        let current = validation
            .record
            .as_ref()
            .filter(|r| r.config_signature == config.signature());
        ModeStatus {
            desired_mode: config.mode,
            validated: current.is_some(),
            validated_at: current.map(|r| r.validated_at),
            config_changed: validation.config_changed,
        }
    }

    pub fn validation_record(&self) -> Option<ValidationRecord> {
        self.validation().record.clone()
    }

    pub fn timeline(&self, limit: Option<usize>) -> warden_common::Result<Vec<HealthTimelineEntry>> {
        self.inner.monitor.timeline().recent(limit)
    }

    /// Live control values written so far
    pub fn controls(&self) -> HashMap<String, f64> {
        self.lock_controls().clone()
    }

    /// Swap in a new snapshot.
    ///
    /// When mode, host or port change, the validation record is cleared,
    /// health returns to UNKNOWN and a restart request is written, all before
    /// this returns.
    pub fn apply(&self, snapshot: ConfigSnapshot) -> warden_common::Result<ApplyOutcome> {
        snapshot.ensure_startable()?;
        let next_key = snapshot.device_key();
        let restart_on_change = snapshot.engine.restart_on_device_change;

        let mut validation = self.validation();
        let (changes, transition) = {
            let mut config = self
                .inner
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let changes = config.device_key().describe_changes(&next_key);
            // Reset before the new device becomes visible to readers
            let transition = if changes.is_empty() {
                None
            } else {
                self.inner.monitor.reset_state("configuration changed")
            };
            *config = Arc::new(snapshot);
            (changes, transition)
        };

        if changes.is_empty() {
            debug!("[ENGINE] Applied configuration, device unchanged");
            return Ok(ApplyOutcome::default());
        }

        let validation_cleared = validation.record.take().is_some();
        validation.config_changed = true;
        drop(validation);

        let summary = changes.join(", ");
        info!("[ENGINE] Device configuration changed: {}", summary);
        if let Some(entry) = transition {
            self.inner.monitor.record_transition(&entry);
        }

        let restart_requested = if restart_on_change {
            match self
                .inner
                .restart
                .request(&format!("device configuration changed: {}", summary))
            {
                Ok(_) => true,
                Err(e) => {
                    error!("[ENGINE] Failed to write restart request: {}", e);
                    false
                }
            }
        } else {
            false
        };

        Ok(ApplyOutcome {
            device_changed: true,
            validation_cleared,
            restart_requested,
            changes,
        })
    }

    /// One connectivity test. Blocking; call from a blocking context.
    ///
    /// A success validates the signature that was active when the test
    /// started, and only if it is still the active one.
    pub fn test_device(&self) -> DeviceTestOutcome {
        let config = self.config();
        let signature = config.signature();
        let target = ProbeTarget {
            mode: config.mode,
            address: config.device_address(),
        };
        let timeout = Duration::from_millis(config.engine.probe_timeout_ms);

        let health = self.inner.monitor.test(&target, timeout);
        if health.state != HealthState::Ok {
            return DeviceTestOutcome {
                health,
                validated: false,
            };
        }

        let mut validation = self.validation();
        if self.config().signature() != signature {
            warn!("[ENGINE] Configuration changed during device test, not validating");
            return DeviceTestOutcome {
                health,
                validated: false,
            };
        }
        validation.record = Some(ValidationRecord {
            validated_at: Utc::now(),
            config_signature: signature,
        });
        validation.config_changed = false;
        info!("[ENGINE] Device validated ({} mode)", config.mode);

        DeviceTestOutcome {
            health,
            validated: true,
        }
    }

    /// Write one control value through the allowlist and the write gate.
    /// Blocking in live mode.
    pub fn write_control(&self, id: &str, value: f64) -> Result<f64, ControlError> {
        if !value.is_finite() {
            return Err(ControlError::InvalidValue(id.to_string()));
        }

        let config = self.config();
        if !config.is_writable(id) {
            warn!("[ENGINE] Rejected write to non-allowlisted control '{}'", id);
            return Err(ControlError::NotWritable(id.to_string()));
        }

        let decision = allowed(config.mode, self.health().state);
        if !decision.allowed {
            warn!("[ENGINE] Write to '{}' blocked: {}", id, decision.reason);
            return Err(ControlError::Blocked(decision.reason));
        }

        if !config.mode.is_simulated() {
            let address = config.device_address().ok_or(ControlError::NoAddress)?;
            let timeout = Duration::from_millis(config.engine.control_timeout_ms);
            self.inner
                .sink
                .send(&address, id, value, timeout)
                .map_err(ControlError::Device)?;
        }

        self.lock_controls().insert(id.to_string(), value);
        debug!("[ENGINE] {} = {}", id, value);
        Ok(value)
    }

    fn validation(&self) -> MutexGuard<'_, ValidationState> {
        self.inner
            .validation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_controls(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.inner
            .controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
