//! Watchdog configuration (`/etc/warden/watch.toml`)
//!
//! Every field has a default, so a missing file runs the stock policy.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use warden_common::StatePaths;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/warden/watch.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds between cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Timeout for every shelled-out command
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Units that must be active
    #[serde(default = "default_units")]
    pub units: Vec<String>,

    /// Unit restarted on restart requests and health failures
    #[serde(default = "default_core_unit")]
    pub core_unit: String,

    /// Overrides `WARDEN_STATE_DIR` / `/var/lib/warden`
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub health: HealthCheckConfig,

    #[serde(default)]
    pub streaks: StreakConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_primary_url")]
    pub primary_url: String,

    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,

    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive failed probes (both URLs) before the core is restarted
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Fully healthy cycles before the active deployment is recorded as last-known-good
    #[serde(default = "default_lkg_streak")]
    pub lkg_streak: u32,

    /// Cycles with any failed check before rolling back
    #[serde(default = "default_rollback_streak")]
    pub rollback_streak: u32,

    /// Minimum time between rollback attempts
    #[serde(default = "default_rollback_cooldown_secs")]
    pub rollback_cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Symlink pointing at the active release
    #[serde(default = "default_current_link")]
    pub current_link: PathBuf,

    /// One directory per release; names sort oldest to newest
    #[serde(default = "default_releases_dir")]
    pub releases_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Validation command, e.g. `["nginx", "-t"]`. Unset disables the check.
    #[serde(default)]
    pub test_command: Option<Vec<String>>,

    /// Live proxy configuration file
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Known-good copy restored over `config_path` on failure
    #[serde(default)]
    pub repair_source: Option<PathBuf>,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_units() -> Vec<String> {
    vec!["wardend.service".to_string(), "nginx.service".to_string()]
}

fn default_core_unit() -> String {
    "wardend.service".to_string()
}

fn default_primary_url() -> String {
    "http://127.0.0.1:7870/health".to_string()
}

fn default_fallback_url() -> String {
    "http://127.0.0.1:7870/api/status".to_string()
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_restart_threshold() -> u32 {
    3
}

fn default_lkg_streak() -> u32 {
    6
}

fn default_rollback_streak() -> u32 {
    10
}

fn default_rollback_cooldown_secs() -> u64 {
    30 * 60
}

fn default_current_link() -> PathBuf {
    PathBuf::from("/opt/warden/current")
}

fn default_releases_dir() -> PathBuf {
    PathBuf::from("/opt/warden/releases")
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            fallback_url: default_fallback_url(),
            timeout_secs: default_health_timeout_secs(),
            restart_threshold: default_restart_threshold(),
        }
    }
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            lkg_streak: default_lkg_streak(),
            rollback_streak: default_rollback_streak(),
            rollback_cooldown_secs: default_rollback_cooldown_secs(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            current_link: default_current_link(),
            releases_dir: default_releases_dir(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            units: default_units(),
            core_unit: default_core_unit(),
            state_dir: None,
            health: HealthCheckConfig::default(),
            streaks: StreakConfig::default(),
            deploy: DeployConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl WatchConfig {
    /// Load from `path`, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("[WATCH] No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("interval_secs must be at least 1");
        }
        if self.health.restart_threshold == 0
            || self.streaks.lkg_streak == 0
            || self.streaks.rollback_streak == 0
        {
            bail!("streak thresholds must be at least 1");
        }
        // Otherwise a failing release would be recorded as last-known-good
        // before it could ever be rolled back
        if self.streaks.rollback_streak <= self.streaks.lkg_streak {
            bail!(
                "rollback_streak ({}) must exceed lkg_streak ({})",
                self.streaks.rollback_streak,
                self.streaks.lkg_streak
            );
        }
        if self.core_unit.trim().is_empty() {
            bail!("core_unit must not be empty");
        }
        if matches!(&self.proxy.test_command, Some(cmd) if cmd.is_empty()) {
            bail!("proxy.test_command must name a program");
        }
        Ok(())
    }

    pub fn state_paths(&self) -> StatePaths {
        match &self.state_dir {
            Some(dir) => StatePaths::new(dir),
            None => StatePaths::from_env(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn rollback_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.streaks.rollback_cooldown_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = WatchConfig::load(&dir.path().join("watch.toml")).unwrap();
        assert_eq!(config, WatchConfig::default());
        assert_eq!(config.streaks.lkg_streak, 6);
        assert_eq!(config.streaks.rollback_streak, 10);
        assert_eq!(config.health.restart_threshold, 3);
        assert_eq!(config.rollback_cooldown(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watch.toml");
        std::fs::write(
            &path,
            r#"
interval_secs = 10
units = ["wardend.service"]

[streaks]
rollback_streak = 8

[proxy]
test_command = ["nginx", "-t"]
"#,
        )
        .unwrap();

        let config = WatchConfig::load(&path).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(10));
        assert_eq!(config.units, vec!["wardend.service".to_string()]);
        assert_eq!(config.streaks.rollback_streak, 8);
        assert_eq!(config.streaks.lkg_streak, 6);
        assert_eq!(
            config.proxy.test_command,
            Some(vec!["nginx".to_string(), "-t".to_string()])
        );
        assert_eq!(config.health.primary_url, "http://127.0.0.1:7870/health");
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watch.toml");
        std::fs::write(&path, "[streaks]\nlkg_streak = 0\n").unwrap();
        assert!(WatchConfig::load(&path).is_err());
    }

    #[test]
    fn test_rollback_streak_must_exceed_lkg_streak() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watch.toml");
        for streaks in ["lkg_streak = 10\nrollback_streak = 6\n", "lkg_streak = 6\nrollback_streak = 6\n"] {
            std::fs::write(&path, format!("[streaks]\n{}", streaks)).unwrap();
            let err = WatchConfig::load(&path).unwrap_err();
            assert!(format!("{:#}", err).contains("must exceed lkg_streak"), "{:#}", err);
        }

        std::fs::write(&path, "[streaks]\nlkg_streak = 6\nrollback_streak = 7\n").unwrap();
        assert!(WatchConfig::load(&path).is_ok());
    }
}
