//! Configuration model.
//!
//! One authoritative [`ConfigSnapshot`] is resolved from, highest first:
//! environment overrides, the operator-edited document (`config.v2.toml`),
//! the legacy JSON document, and compiled defaults. Every resolved field
//! records where it came from.

mod store;
mod validate;

pub use store::{ConfigStore, WriteOutcome, ENV_PREFIX, MAX_BACKUPS};
pub use validate::{is_valid_control_id, is_valid_host, validate_edit, ValidatedEdit};

use crate::error::{Result, WardenError};
use crate::health::DEFAULT_DISCONNECT_THRESHOLD;
use crate::mode::OperatingMode;
use crate::timeline::DEFAULT_TIMELINE_CAPACITY;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::Ipv6Addr;

/// Port used when no layer supplies one
pub const DEFAULT_DEVICE_PORT: u16 = 1710;

/// Controls writable out of the box
pub const DEFAULT_WRITABLE: &[&str] = &["master_gain", "master_mute", "input_gain", "preset_recall"];

// ============================================================================
// Engine settings ([engine] table)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Consecutive probe failures before the device counts as disconnected
    #[serde(default = "default_disconnect_threshold")]
    pub disconnect_threshold: u32,

    /// Connectivity probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Control write timeout in milliseconds
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,

    /// Health timeline line cap
    #[serde(default = "default_timeline_max_entries")]
    pub timeline_max_entries: usize,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Ask the supervisor for a restart when mode/host/port change
    #[serde(default = "default_restart_on_device_change")]
    pub restart_on_device_change: bool,

    /// Units reported on the supervisor status endpoint
    #[serde(default = "default_supervised_units")]
    pub supervised_units: Vec<String>,

    /// Unit started by the supervisor start action
    #[serde(default = "default_watchdog_unit")]
    pub watchdog_unit: String,
}

fn default_disconnect_threshold() -> u32 {
    DEFAULT_DISCONNECT_THRESHOLD
}

fn default_probe_timeout_ms() -> u64 {
    1_500
}

fn default_control_timeout_ms() -> u64 {
    2_000
}

fn default_timeline_max_entries() -> usize {
    DEFAULT_TIMELINE_CAPACITY
}

fn default_listen_addr() -> String {
    "127.0.0.1:7870".to_string()
}

fn default_restart_on_device_change() -> bool {
    true
}

fn default_supervised_units() -> Vec<String> {
    vec!["wardend.service".to_string(), "wardenwatch.service".to_string()]
}

fn default_watchdog_unit() -> String {
    "wardenwatch.service".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            disconnect_threshold: default_disconnect_threshold(),
            probe_timeout_ms: default_probe_timeout_ms(),
            control_timeout_ms: default_control_timeout_ms(),
            timeline_max_entries: default_timeline_max_entries(),
            listen_addr: default_listen_addr(),
            restart_on_device_change: default_restart_on_device_change(),
            supervised_units: default_supervised_units(),
            watchdog_unit: default_watchdog_unit(),
        }
    }
}

// ============================================================================
// Persisted documents
// ============================================================================

/// Operator-edited document (`config.v2.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Older spelling of `mode`; `mode` wins when both are present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writable: Option<Vec<String>>,

    #[serde(default)]
    pub engine: EngineSettings,
}

impl ConfigDocument {
    /// Fill fields this document lacks from an older one
    pub fn fill_missing_from(&mut self, older: &ConfigDocument) {
        if self.mode.is_none() && self.device_mode.is_none() {
            self.mode = older.mode.clone().or_else(|| older.device_mode.clone());
        }
        if self.device_host.is_none() {
            self.device_host = older.device_host.clone();
        }
        if self.device_port.is_none() {
            self.device_port = older.device_port;
        }
        if self.admin_secret.is_none() {
            self.admin_secret = older.admin_secret.clone();
        }
        if self.writable.is_none() {
            self.writable = older.writable.clone();
        }
    }
}

/// Pre-v2 JSON document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyDocument {
    #[serde(default)]
    pub device_mode: Option<String>,
    #[serde(default)]
    pub dsp_host: Option<String>,
    #[serde(default)]
    pub dsp_port: Option<u32>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub writable_controls: Option<Vec<String>>,
}

impl LegacyDocument {
    pub fn into_document(self) -> ConfigDocument {
        ConfigDocument {
            mode: None,
            device_mode: self.device_mode,
            device_host: self.dsp_host.filter(|h| !h.trim().is_empty()),
            device_port: self
                .dsp_port
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0),
            admin_secret: self.admin_password,
            writable: self.writable_controls,
            engine: EngineSettings::default(),
        }
    }
}

// ============================================================================
// Provenance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Environment,
    Document,
    Legacy,
    Default,
}

/// Which layer, and which key within it, supplied a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSource {
    pub layer: Layer,
    pub key: String,
}

impl FieldSource {
    pub fn new(layer: Layer, key: &str) -> Self {
        Self {
            layer,
            key: key.to_string(),
        }
    }

    pub fn default_value() -> Self {
        Self::new(Layer::Default, "default")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub mode: FieldSource,
    pub device_host: FieldSource,
    pub device_port: FieldSource,
    pub admin_secret: FieldSource,
    pub writable: FieldSource,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            mode: FieldSource::default_value(),
            device_host: FieldSource::default_value(),
            device_port: FieldSource::default_value(),
            admin_secret: FieldSource::default_value(),
            writable: FieldSource::default_value(),
        }
    }
}

// ============================================================================
// Resolved snapshot
// ============================================================================

/// The device-relevant subset of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKey {
    pub mode: OperatingMode,
    pub host: String,
    pub port: u16,
}

impl DeviceKey {
    /// SHA-256 over mode, host and port
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mode.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.host.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.port.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Human-readable list of differences, empty when equal
    pub fn describe_changes(&self, next: &DeviceKey) -> Vec<String> {
        let mut changes = Vec::new();
        if self.mode != next.mode {
            changes.push(format!("mode {} -> {}", self.mode, next.mode));
        }
        if self.host != next.host {
            changes.push(format!("host '{}' -> '{}'", self.host, next.host));
        }
        if self.port != next.port {
            changes.push(format!("port {} -> {}", self.port, next.port));
        }
        changes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSnapshot {
    pub mode: OperatingMode,
    pub device_host: String,
    pub device_port: u16,
    #[serde(skip_serializing)]
    pub admin_secret: String,
    pub writable: Vec<String>,
    pub engine: EngineSettings,
    pub provenance: Provenance,
    pub warnings: Vec<String>,
}

impl ConfigSnapshot {
    /// Compiled defaults only
    pub fn defaults() -> Self {
        Self {
            mode: OperatingMode::default(),
            device_host: String::new(),
            device_port: DEFAULT_DEVICE_PORT,
            admin_secret: String::new(),
            writable: DEFAULT_WRITABLE.iter().map(|s| s.to_string()).collect(),
            engine: EngineSettings::default(),
            provenance: Provenance::default(),
            warnings: Vec::new(),
        }
    }

    pub fn device_key(&self) -> DeviceKey {
        DeviceKey {
            mode: self.mode,
            host: self.device_host.clone(),
            port: self.device_port,
        }
    }

    pub fn signature(&self) -> String {
        self.device_key().signature()
    }

    /// `host:port` for probes and writes; `None` until both are configured
    pub fn device_address(&self) -> Option<String> {
        let host = self.device_host.trim();
        if host.is_empty() || self.device_port == 0 {
            return None;
        }
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.parse::<Ipv6Addr>().is_ok() {
            Some(format!("[{}]:{}", host, self.device_port))
        } else {
            Some(format!("{}:{}", host, self.device_port))
        }
    }

    pub fn is_writable(&self, control_id: &str) -> bool {
        self.writable.iter().any(|w| w == control_id)
    }

    pub fn has_admin_secret(&self) -> bool {
        !self.admin_secret.is_empty()
    }

    /// Conditions the engine refuses to start (or apply) without
    pub fn ensure_startable(&self) -> Result<()> {
        if self.writable.is_empty() {
            return Err(WardenError::EmptyAllowlist);
        }
        Ok(())
    }

    /// Editable view of this snapshot
    pub fn editable(&self) -> EditableConfig {
        EditableConfig {
            mode: self.mode,
            device_host: self.device_host.clone(),
            device_port: self.device_port,
            writable: self.writable.clone(),
        }
    }
}

// ============================================================================
// Edits
// ============================================================================

/// Fields an operator may change through the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableConfig {
    pub mode: OperatingMode,
    pub device_host: String,
    /// 0 when unset
    pub device_port: u16,
    pub writable: Vec<String>,
}

/// Raw edit request; validated before anything touches disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEdit {
    pub mode: String,
    #[serde(default)]
    pub device_host: String,
    /// Wide type so out-of-range input reaches validation
    #[serde(default)]
    pub device_port: i64,
    /// `None` keeps the current allowlist
    #[serde(default)]
    pub writable: Option<Vec<String>>,
}

impl From<&EditableConfig> for ConfigEdit {
    fn from(cfg: &EditableConfig) -> Self {
        Self {
            mode: cfg.mode.as_str().to_string(),
            device_host: cfg.device_host.clone(),
            device_port: i64::from(cfg.device_port),
            writable: Some(cfg.writable.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_changes_with_device_fields() {
        let base = ConfigSnapshot::defaults();
        let mut other = base.clone();
        assert_eq!(base.signature(), other.signature());

        other.admin_secret = "changed".to_string();
        other.writable.push("extra".to_string());
        assert_eq!(base.signature(), other.signature());

        other.device_host = "10.0.0.9".to_string();
        assert_ne!(base.signature(), other.signature());
    }

    #[test]
    fn test_describe_changes() {
        let a = DeviceKey {
            mode: OperatingMode::Live,
            host: "10.0.0.5".to_string(),
            port: 1710,
        };
        let b = DeviceKey {
            host: "10.0.0.6".to_string(),
            ..a.clone()
        };
        assert!(a.describe_changes(&a).is_empty());
        assert_eq!(a.describe_changes(&b), vec!["host '10.0.0.5' -> '10.0.0.6'".to_string()]);
    }

    #[test]
    fn test_device_address() {
        let mut snap = ConfigSnapshot::defaults();
        assert_eq!(snap.device_address(), None);

        snap.device_host = "dsp.local".to_string();
        assert_eq!(snap.device_address(), Some("dsp.local:1710".to_string()));

        snap.device_host = "fe80::1".to_string();
        assert_eq!(snap.device_address(), Some("[fe80::1]:1710".to_string()));

        snap.device_port = 0;
        assert_eq!(snap.device_address(), None);
    }

    #[test]
    fn test_empty_allowlist_is_not_startable() {
        let mut snap = ConfigSnapshot::defaults();
        assert!(snap.ensure_startable().is_ok());
        snap.writable.clear();
        assert!(matches!(snap.ensure_startable(), Err(WardenError::EmptyAllowlist)));
    }

    #[test]
    fn test_secret_is_never_serialized() {
        let mut snap = ConfigSnapshot::defaults();
        snap.admin_secret = "hunter2".to_string();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_document_parses_partial_toml() {
        let doc: ConfigDocument = toml::from_str(
            r#"
mode = "live"
device_host = "10.0.0.5"

[engine]
disconnect_threshold = 5
"#,
        )
        .unwrap();
        assert_eq!(doc.mode.as_deref(), Some("live"));
        assert_eq!(doc.device_port, None);
        assert_eq!(doc.engine.disconnect_threshold, 5);
        assert_eq!(doc.engine.probe_timeout_ms, 1_500);
    }

    #[test]
    fn test_legacy_document_conversion() {
        let legacy: LegacyDocument = serde_json::from_str(
            r#"{"device_mode": "LIVE", "dsp_host": "10.1.1.1", "dsp_port": 99999, "writable_controls": ["gain"]}"#,
        )
        .unwrap();
        let doc = legacy.into_document();
        assert_eq!(doc.device_mode.as_deref(), Some("LIVE"));
        assert_eq!(doc.mode, None);
        assert_eq!(doc.device_host.as_deref(), Some("10.1.1.1"));
        // Out of range ports are dropped rather than truncated
        assert_eq!(doc.device_port, None);
        assert_eq!(doc.writable, Some(vec!["gain".to_string()]));
    }
}
