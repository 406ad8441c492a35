//! Layered configuration store with atomic, backed-up writes.

use super::validate::validate_edit;
use super::{
    ConfigDocument, ConfigEdit, ConfigSnapshot, EditableConfig, FieldSource, Layer, LegacyDocument,
};
use crate::atomic::write_atomic;
use crate::error::{Result, WardenError};
use crate::mode::OperatingMode;
use crate::paths::StatePaths;
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Environment variables considered by the store start with this
pub const ENV_PREFIX: &str = "WARDEN_";

/// Backups of the operator document kept on disk
pub const MAX_BACKUPS: usize = 10;

const ENV_MODE: &str = "WARDEN_MODE";
const ENV_HOST: &str = "WARDEN_DEVICE_HOST";
const ENV_PORT: &str = "WARDEN_DEVICE_PORT";
const ENV_SECRET: &str = "WARDEN_ADMIN_SECRET";
const ENV_WRITABLE: &str = "WARDEN_WRITABLE";

/// Result of a successful write
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Editable fields as persisted, normalized
    pub saved: EditableConfig,
    /// Where the effective mode now comes from
    pub mode_source: FieldSource,
    pub backup: Option<PathBuf>,
}

/// Persisted layers, legacy already converted
#[derive(Debug, Default)]
struct Layers {
    document: Option<ConfigDocument>,
    legacy: Option<ConfigDocument>,
    warnings: Vec<String>,
}

pub struct ConfigStore {
    paths: StatePaths,
    env: HashMap<String, String>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Store reading overrides from the process environment
    pub fn new(paths: StatePaths) -> Self {
        let env = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::with_env(paths, env)
    }

    /// Store with an explicit override map
    pub fn with_env(paths: StatePaths, env: HashMap<String, String>) -> Self {
        Self {
            paths,
            env,
            write_lock: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Resolve the authoritative snapshot across every layer.
    ///
    /// Never fails because of bad values; those become warnings. Only I/O
    /// errors other than "not found" propagate.
    pub fn load(&self) -> Result<ConfigSnapshot> {
        let layers = self.read_layers()?;
        Ok(resolve(Some(&self.env), &layers))
    }

    /// Editable fields as persisted, without environment overrides
    pub fn read(&self) -> Result<EditableConfig> {
        let layers = self.read_layers()?;
        Ok(persisted_editable(&layers))
    }

    /// Validate, back up, and atomically replace the operator document
    pub fn write(&self, edit: &ConfigEdit) -> Result<WriteOutcome> {
        let validated = validate_edit(edit)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let layers = self.read_layers()?;

        let mut document = layers.document.clone().unwrap_or_default();
        document.mode = Some(validated.mode.as_str().to_string());
        document.device_mode = None;
        document.device_host = Some(validated.device_host.clone()).filter(|h| !h.is_empty());
        document.device_port = Some(validated.device_port).filter(|p| *p != 0);
        if let Some(writable) = validated.writable {
            document.writable = Some(writable);
        }

        let backup = self.backup_current()?;

        let content = toml::to_string_pretty(&document)?;
        write_atomic(&self.paths.config(), content.as_bytes())?;
        info!(
            "[CONFIG] Saved {} (mode={}, host='{}', port={})",
            self.paths.config().display(),
            validated.mode,
            validated.device_host,
            validated.device_port
        );

        let written = Layers {
            document: Some(document),
            legacy: None,
            warnings: Vec::new(),
        };
        let saved = persisted_editable(&written);
        let mode_source = resolve(Some(&self.env), &written).provenance.mode;

        Ok(WriteOutcome {
            saved,
            mode_source,
            backup,
        })
    }

    fn read_layers(&self) -> Result<Layers> {
        let mut layers = Layers::default();
        let mut document_unreadable = false;

        if let Some(content) = read_optional(&self.paths.config())? {
            match toml::from_str::<ConfigDocument>(&content) {
                Ok(doc) => layers.document = Some(doc),
                Err(e) => {
                    document_unreadable = true;
                    let msg = format!(
                        "ignoring unreadable {}: {}",
                        self.paths.config().display(),
                        e
                    );
                    warn!("[CONFIG] {}", msg);
                    layers.warnings.push(msg);
                }
            }
        }

        if let Some(content) = read_optional(&self.paths.legacy_config())? {
            match serde_json::from_str::<LegacyDocument>(&content) {
                Ok(legacy) => {
                    let legacy = legacy.into_document();
                    // Never migrate over a document an operator still has to fix
                    if !document_unreadable {
                        self.migrate_legacy(&mut layers, &legacy);
                    }
                    layers.legacy = Some(legacy);
                }
                Err(e) => {
                    let msg = format!(
                        "ignoring unreadable legacy {}: {}",
                        self.paths.legacy_config().display(),
                        e
                    );
                    warn!("[CONFIG] {}", msg);
                    layers.warnings.push(msg);
                }
            }
        }

        Ok(layers)
    }

    /// Carry the legacy document forward into the versioned one, once.
    ///
    /// On failure the legacy file stays in place and the merge is retried
    /// on the next read.
    fn migrate_legacy(&self, layers: &mut Layers, legacy: &ConfigDocument) {
        let mut merged = layers.document.clone().unwrap_or_default();
        merged.fill_missing_from(legacy);

        let migrated = toml::to_string_pretty(&merged)
            .map_err(WardenError::from)
            .and_then(|content| write_atomic(&self.paths.config(), content.as_bytes()));
        if let Err(e) = migrated {
            let msg = format!("legacy config migration failed: {}", e);
            warn!("[CONFIG] {}", msg);
            layers.warnings.push(msg);
            return;
        }

        let legacy_path = self.paths.legacy_config();
        let retired = legacy_path.with_extension("json.migrated");
        if let Err(e) = fs::rename(&legacy_path, &retired) {
            warn!(
                "[CONFIG] Migrated legacy config but could not retire {}: {}",
                legacy_path.display(),
                e
            );
        }
        info!(
            "[CONFIG] Migrated legacy config {} -> {}",
            legacy_path.display(),
            self.paths.config().display()
        );
        layers.document = Some(merged);
    }

    /// Copy the current document aside and prune old copies
    fn backup_current(&self) -> Result<Option<PathBuf>> {
        let target = self.paths.config();
        let Some(previous) = read_optional_bytes(&target)? else {
            return Ok(None);
        };

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let backup = backup_prefix(&target).map(|prefix| PathBuf::from(format!("{}{}", prefix, stamp)));
        let Some(backup) = backup else {
            return Ok(None);
        };
        write_atomic(&backup, &previous)?;
        self.prune_backups(&target);
        Ok(Some(backup))
    }

    fn prune_backups(&self, target: &Path) {
        let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
            return;
        };
        let prefix = format!("{}.bak.", name.to_string_lossy());

        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();
        if backups.len() <= MAX_BACKUPS {
            return;
        }

        // Timestamps sort lexically
        backups.sort();
        let excess = backups.len() - MAX_BACKUPS;
        for old in backups.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&old) {
                warn!("[CONFIG] Could not prune backup {}: {}", old.display(), e);
            }
        }
    }
}

fn backup_prefix(target: &Path) -> Option<String> {
    target.to_str().map(|s| format!("{}.bak.", s))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_optional_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Editable view of the persisted document alone
fn persisted_editable(layers: &Layers) -> EditableConfig {
    let defaults = ConfigSnapshot::defaults();
    let doc = layers.document.clone().unwrap_or_default();

    let mode = non_empty(&doc.mode)
        .or_else(|| non_empty(&doc.device_mode))
        .map(|raw| OperatingMode::coerce(raw).0)
        .unwrap_or(defaults.mode);

    EditableConfig {
        mode,
        device_host: non_empty(&doc.device_host).unwrap_or("").to_string(),
        device_port: doc.device_port.unwrap_or(0),
        writable: doc.writable.clone().unwrap_or(defaults.writable),
    }
}

/// Merge layers into one snapshot, highest precedence first
fn resolve(env: Option<&HashMap<String, String>>, layers: &Layers) -> ConfigSnapshot {
    let mut snap = ConfigSnapshot::defaults();
    snap.warnings.extend(layers.warnings.iter().cloned());

    let env_value = |key: &str| -> Option<String> {
        env.and_then(|e| e.get(key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let doc = layers.document.as_ref();
    let legacy = layers.legacy.as_ref();

    if let Some(doc) = doc {
        snap.engine = doc.engine.clone();
    }

    // Mode: candidate fields in order
    let mut mode_candidates: Vec<(FieldSource, String)> = Vec::new();
    if let Some(v) = env_value(ENV_MODE) {
        mode_candidates.push((FieldSource::new(Layer::Environment, ENV_MODE), v));
    }
    for (layer, source) in [(Layer::Document, doc), (Layer::Legacy, legacy)] {
        if let Some(d) = source {
            if let Some(v) = non_empty(&d.mode) {
                mode_candidates.push((FieldSource::new(layer, "mode"), v.to_string()));
            }
            if let Some(v) = non_empty(&d.device_mode) {
                mode_candidates.push((FieldSource::new(layer, "device_mode"), v.to_string()));
            }
        }
    }
    if let Some((source, raw)) = mode_candidates.into_iter().next() {
        let (mode, warning) = OperatingMode::coerce(&raw);
        if let Some(w) = warning {
            warn!("[CONFIG] {} ({:?} '{}')", w, source.layer, source.key);
            snap.warnings.push(w);
        }
        snap.mode = mode;
        snap.provenance.mode = source;
    }

    // Host
    if let Some(v) = env_value(ENV_HOST) {
        snap.device_host = v;
        snap.provenance.device_host = FieldSource::new(Layer::Environment, ENV_HOST);
    } else if let Some((layer, v)) = first_layer(doc, legacy, |d| non_empty(&d.device_host).map(str::to_string)) {
        snap.device_host = v;
        snap.provenance.device_host = FieldSource::new(layer, "device_host");
    }

    // Port
    let env_port = env_value(ENV_PORT).and_then(|raw| match raw.parse::<u16>() {
        Ok(p) if p != 0 => Some(p),
        _ => {
            let w = format!("ignoring invalid {}='{}'", ENV_PORT, raw);
            warn!("[CONFIG] {}", w);
            snap.warnings.push(w);
            None
        }
    });
    if let Some(p) = env_port {
        snap.device_port = p;
        snap.provenance.device_port = FieldSource::new(Layer::Environment, ENV_PORT);
    } else if let Some((layer, p)) = first_layer(doc, legacy, |d| d.device_port.filter(|p| *p != 0)) {
        snap.device_port = p;
        snap.provenance.device_port = FieldSource::new(layer, "device_port");
    }

    // Admin secret
    if let Some(v) = env_value(ENV_SECRET) {
        snap.admin_secret = v;
        snap.provenance.admin_secret = FieldSource::new(Layer::Environment, ENV_SECRET);
    } else if let Some((layer, v)) = first_layer(doc, legacy, |d| non_empty(&d.admin_secret).map(str::to_string)) {
        snap.admin_secret = v;
        snap.provenance.admin_secret = FieldSource::new(layer, "admin_secret");
    }
    if snap.admin_secret.is_empty() {
        snap.warnings
            .push("no admin secret configured; mutating endpoints are disabled".to_string());
    }

    // Writable allowlist
    if let Some(v) = env_value(ENV_WRITABLE) {
        snap.writable = split_list(&v);
        snap.provenance.writable = FieldSource::new(Layer::Environment, ENV_WRITABLE);
    } else if let Some((layer, v)) = first_layer(doc, legacy, |d| d.writable.clone()) {
        snap.writable = v.iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        snap.provenance.writable = FieldSource::new(layer, "writable");
    }

    snap
}

fn first_layer<T>(
    doc: Option<&ConfigDocument>,
    legacy: Option<&ConfigDocument>,
    pick: impl Fn(&ConfigDocument) -> Option<T>,
) -> Option<(Layer, T)> {
    doc.and_then(|d| pick(d).map(|v| (Layer::Document, v)))
        .or_else(|| legacy.and_then(|d| pick(d).map(|v| (Layer::Legacy, v))))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DEVICE_PORT;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ConfigStore {
        ConfigStore::with_env(StatePaths::new(dir.path()), HashMap::new())
    }

    fn store_with_env(dir: &TempDir, pairs: &[(&str, &str)]) -> ConfigStore {
        let env = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigStore::with_env(StatePaths::new(dir.path()), env)
    }

    fn edit(mode: &str, host: &str, port: i64, writable: Option<&[&str]>) -> ConfigEdit {
        ConfigEdit {
            mode: mode.to_string(),
            device_host: host.to_string(),
            device_port: port,
            writable: writable.map(|w| w.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn test_defaults_when_nothing_exists() {
        let dir = TempDir::new().unwrap();
        let snap = store(&dir).load().unwrap();
        assert_eq!(snap.mode, OperatingMode::Mock);
        assert_eq!(snap.device_port, DEFAULT_DEVICE_PORT);
        assert_eq!(snap.provenance.mode.layer, Layer::Default);
        assert!(!snap.writable.is_empty());
    }

    #[test]
    fn test_round_trip_for_valid_edits() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let cases = [
            edit("live", "10.0.0.5", 1710, Some(&["master_gain", "mute"])),
            edit("mock", "", 0, Some(&["a"])),
            edit("LIVE", "dsp-rack.local", 65535, Some(&["x.y", "z-1"])),
            edit("simulated", "::1", 1, Some(&["gain"])),
        ];
        for case in cases {
            let expected = validate_edit(&case).unwrap();
            let outcome = store.write(&case).unwrap();
            let read = store.read().unwrap();
            assert_eq!(read, outcome.saved);
            assert_eq!(read.mode, expected.mode);
            assert_eq!(read.device_host, expected.device_host);
            assert_eq!(read.device_port, expected.device_port);
            assert_eq!(Some(read.writable), expected.writable);
        }
    }

    #[test]
    fn test_invalid_edit_never_touches_disk() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write(&edit("live", "10.0.0.5", 1710, None)).unwrap();
        let before = fs::read_to_string(store.paths().config()).unwrap();

        assert!(store.write(&edit("live", "not a host", 1710, None)).is_err());
        assert!(store.write(&edit("live", "10.0.0.5", 70000, None)).is_err());
        assert!(store.write(&edit("warp", "10.0.0.5", 1710, None)).is_err());

        assert_eq!(fs::read_to_string(store.paths().config()).unwrap(), before);
        // The first write had nothing to back up and the rejected ones wrote nothing
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_write_keeps_backup_of_previous_document() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.write(&edit("mock", "", 0, None)).unwrap();
        assert!(first.backup.is_none());

        let before = fs::read_to_string(store.paths().config()).unwrap();
        let second = store.write(&edit("live", "10.0.0.5", 1710, None)).unwrap();
        let backup = second.backup.unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), before);
    }

    #[test]
    fn test_backups_are_pruned() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for i in 0..(MAX_BACKUPS + 5) {
            store.write(&edit("live", "10.0.0.5", 1000 + i as i64, None)).unwrap();
        }
        let backups = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak."))
            .count();
        assert_eq!(backups, MAX_BACKUPS);
    }

    #[test]
    fn test_write_preserves_secret_and_engine_settings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.v2.toml"),
            "admin_secret = \"s3cret\"\n\n[engine]\ndisconnect_threshold = 4\n",
        )
        .unwrap();
        let store = store(&dir);
        store.write(&edit("live", "10.0.0.5", 1710, None)).unwrap();

        let snap = store.load().unwrap();
        assert_eq!(snap.admin_secret, "s3cret");
        assert_eq!(snap.engine.disconnect_threshold, 4);
    }

    #[test]
    fn test_environment_wins() {
        let dir = TempDir::new().unwrap();
        let store = store_with_env(
            &dir,
            &[
                ("WARDEN_MODE", "live"),
                ("WARDEN_DEVICE_HOST", "192.168.1.50"),
                ("WARDEN_DEVICE_PORT", "9000"),
                ("WARDEN_WRITABLE", "gain, mute"),
            ],
        );
        let outcome = store.write(&edit("mock", "10.0.0.5", 1710, None)).unwrap();
        assert_eq!(outcome.mode_source, FieldSource::new(Layer::Environment, "WARDEN_MODE"));

        let snap = store.load().unwrap();
        assert_eq!(snap.mode, OperatingMode::Live);
        assert_eq!(snap.device_host, "192.168.1.50");
        assert_eq!(snap.device_port, 9000);
        assert_eq!(snap.writable, vec!["gain".to_string(), "mute".to_string()]);

        // read() shows what is persisted, not the override
        assert_eq!(store.read().unwrap().mode, OperatingMode::Mock);
    }

    #[test]
    fn test_mode_key_beats_device_mode_key() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.v2.toml"),
            "mode = \"live\"\ndevice_mode = \"mock\"\n",
        )
        .unwrap();
        let snap = store(&dir).load().unwrap();
        assert_eq!(snap.mode, OperatingMode::Live);
        assert_eq!(snap.provenance.mode, FieldSource::new(Layer::Document, "mode"));

        fs::write(dir.path().join("config.v2.toml"), "device_mode = \"Live (rack)\"\n").unwrap();
        let snap = store(&dir).load().unwrap();
        assert_eq!(snap.mode, OperatingMode::Live);
        assert_eq!(snap.provenance.mode, FieldSource::new(Layer::Document, "device_mode"));
    }

    #[test]
    fn test_bad_mode_is_coerced_with_warning() {
        let dir = TempDir::new().unwrap();
        let store = store_with_env(&dir, &[("WARDEN_MODE", "hyperdrive")]);
        let snap = store.load().unwrap();
        assert_eq!(snap.mode, OperatingMode::Mock);
        assert!(snap.warnings.iter().any(|w| w.contains("hyperdrive")));
    }

    #[test]
    fn test_corrupt_document_does_not_prevent_load() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.v2.toml"), "mode = [[[").unwrap();
        let snap = store(&dir).load().unwrap();
        assert_eq!(snap.mode, OperatingMode::Mock);
        assert!(snap.warnings.iter().any(|w| w.contains("unreadable")));
    }

    #[test]
    fn test_legacy_document_is_migrated_once() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"device_mode": "LIVE", "dsp_host": "10.9.9.9", "dsp_port": 1800, "admin_password": "old"}"#,
        )
        .unwrap();
        let store = store(&dir);

        let snap = store.load().unwrap();
        assert_eq!(snap.mode, OperatingMode::Live);
        assert_eq!(snap.device_host, "10.9.9.9");
        assert_eq!(snap.device_port, 1800);
        assert_eq!(snap.admin_secret, "old");

        assert!(dir.path().join("config.v2.toml").exists());
        assert!(!dir.path().join("config.json").exists());
        assert!(dir.path().join("config.json.migrated").exists());

        // Second read comes from the versioned document
        let again = store.load().unwrap();
        assert_eq!(again.device_host, "10.9.9.9");
        assert_eq!(again.provenance.device_host.layer, Layer::Document);
    }

    #[test]
    fn test_legacy_only_fills_gaps() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.v2.toml"), "device_host = \"10.0.0.1\"\n").unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"dsp_host": "10.9.9.9", "dsp_port": 1800}"#,
        )
        .unwrap();

        let snap = store(&dir).load().unwrap();
        assert_eq!(snap.device_host, "10.0.0.1");
        assert_eq!(snap.device_port, 1800);
    }

    #[test]
    fn test_invalid_env_port_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store_with_env(&dir, &[("WARDEN_DEVICE_PORT", "99999")]);
        let snap = store.load().unwrap();
        assert_eq!(snap.device_port, DEFAULT_DEVICE_PORT);
        assert!(snap.warnings.iter().any(|w| w.contains("WARDEN_DEVICE_PORT")));
    }
}
