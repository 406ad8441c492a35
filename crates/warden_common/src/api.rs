//! HTTP wire types shared by the engine and the supervisor.
//!
//! Every response carries `ok`; failures add a narrative `error` string and
//! nothing more structured.

use crate::config::{EditableConfig, FieldSource, Provenance};
use crate::health::HealthSnapshot;
use crate::mode::OperatingMode;
use crate::systemd::UnitStatus;
use crate::timeline::HealthTimelineEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bare action result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub ok: bool,
    pub version: String,
    pub uptime_secs: u64,
}

/// `GET /api/mode`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeStatus {
    pub desired_mode: OperatingMode,
    pub validated: bool,
    pub validated_at: Option<DateTime<Utc>>,
    /// A device-relevant change happened since the last validation
    pub config_changed: bool,
}

/// `GET /api/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub mode: ModeStatus,
    pub health: HealthSnapshot,
}

/// `GET /api/device/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub health: HealthSnapshot,
}

/// `GET /api/device/timeline`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineResponse {
    pub ok: bool,
    pub limit: usize,
    pub entries: Vec<HealthTimelineEntry>,
}

/// `GET /api/config`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReadResponse {
    pub ok: bool,
    /// Persisted editable fields
    pub config: EditableConfig,
    /// Effective values after environment overrides
    pub effective: EditableConfig,
    pub provenance: Provenance,
    pub admin_secret_set: bool,
    pub warnings: Vec<String>,
}

/// `POST /api/config`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWriteResponse {
    pub ok: bool,
    pub saved: EditableConfig,
    pub mode_source: FieldSource,
    pub validation_cleared: bool,
    pub restart_requested: bool,
}

/// `POST /api/device/test`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTestResponse {
    pub ok: bool,
    pub health: HealthSnapshot,
    pub validated: bool,
    /// Why the test failed; absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /api/controls` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlWriteRequest {
    pub id: String,
    pub value: f64,
}

/// `POST /api/controls`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlWriteResponse {
    pub ok: bool,
    pub id: String,
    pub value: f64,
}

/// `GET /api/supervisor/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatusResponse {
    pub ok: bool,
    pub units: Vec<UnitStatus>,
}
