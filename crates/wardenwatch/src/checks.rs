//! Check abstractions used by the supervisor cycle.
//!
//! Production implementations shell out to `systemctl`, issue HTTP probes
//! and run the proxy's own validation command. The fakes at the bottom
//! record every call so cycle behaviour can be tested without a host.

use crate::config::{HealthCheckConfig, ProxyConfig};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use warden_common::atomic::write_atomic;
use warden_common::systemd::{run_command, Systemctl};

// ============================================================================
// Traits
// ============================================================================

#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// True only for an `active` unit
    async fn is_active(&self, unit: &str) -> bool;

    async fn restart(&self, unit: &str) -> Result<()>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Ok when the endpoint answers with a success status
    async fn check(&self, url: &str) -> Result<()>;
}

#[async_trait]
pub trait ProxyCheck: Send + Sync {
    async fn verify(&self) -> Result<()>;

    /// Narrow self-repair; the caller verifies again afterwards
    async fn repair(&self) -> Result<()>;
}

// ============================================================================
// Real implementations
// ============================================================================

pub struct SystemdServices {
    systemctl: Systemctl,
}

impl SystemdServices {
    pub fn new(timeout: Duration) -> Self {
        Self {
            systemctl: Systemctl::new(timeout),
        }
    }
}

#[async_trait]
impl ServiceControl for SystemdServices {
    async fn is_active(&self, unit: &str) -> bool {
        matches!(self.systemctl.is_active(unit).await.as_deref(), Ok("active"))
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.systemctl.restart(unit).await?;
        Ok(())
    }
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(config: &HealthCheckConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, url: &str) -> Result<()> {
        self.client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()
            .with_context(|| format!("GET {}", url))?;
        Ok(())
    }
}

/// Runs the proxy's own config test; repairs by restoring a known-good copy
pub struct CommandProxyCheck {
    program: String,
    args: Vec<String>,
    config_path: Option<PathBuf>,
    repair_source: Option<PathBuf>,
    timeout: Duration,
}

impl CommandProxyCheck {
    pub fn new(command: &[String], config: &ProxyConfig, timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("proxy test command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            config_path: config.config_path.clone(),
            repair_source: config.repair_source.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl ProxyCheck for CommandProxyCheck {
    async fn verify(&self) -> Result<()> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let output = run_command(&self.program, &args, self.timeout).await?;
        if output.status.success() {
            return Ok(());
        }
        bail!(
            "{} exited with {}: {}",
            self.program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }

    async fn repair(&self) -> Result<()> {
        let (Some(target), Some(source)) = (&self.config_path, &self.repair_source) else {
            bail!("no proxy repair source configured");
        };
        let content = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        write_atomic(target, &content)
            .with_context(|| format!("Failed to restore {}", target.display()))?;
        info!("[WATCH] Restored {} from {}", target.display(), source.display());
        Ok(())
    }
}

/// Used when no proxy test command is configured
pub struct NoProxyCheck;

#[async_trait]
impl ProxyCheck for NoProxyCheck {
    async fn verify(&self) -> Result<()> {
        Ok(())
    }

    async fn repair(&self) -> Result<()> {
        Ok(())
    }
}

pub fn proxy_check_from(config: &ProxyConfig, timeout: Duration) -> Result<Arc<dyn ProxyCheck>> {
    match &config.test_command {
        Some(command) => Ok(Arc::new(CommandProxyCheck::new(command, config, timeout)?)),
        None => Ok(Arc::new(NoProxyCheck)),
    }
}

// ============================================================================
// Fakes (testing)
// ============================================================================

/// In-memory units. A successful restart makes a unit active.
#[derive(Default)]
pub struct FakeServices {
    inactive: Mutex<HashSet<String>>,
    failing_restarts: Mutex<HashSet<String>>,
    restarts: Mutex<Vec<String>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, unit: &str, active: bool) {
        let mut inactive = self.inactive.lock().unwrap_or_else(|e| e.into_inner());
        if active {
            inactive.remove(unit);
        } else {
            inactive.insert(unit.to_string());
        }
    }

    pub fn fail_restarts(&self, unit: &str, fail: bool) {
        let mut failing = self.failing_restarts.lock().unwrap_or_else(|e| e.into_inner());
        if fail {
            failing.insert(unit.to_string());
        } else {
            failing.remove(unit);
        }
    }

    /// Every restart attempted, in order
    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn restart_count(&self, unit: &str) -> usize {
        self.restarts().iter().filter(|u| *u == unit).count()
    }
}

#[async_trait]
impl ServiceControl for FakeServices {
    async fn is_active(&self, unit: &str) -> bool {
        !self.inactive.lock().unwrap_or_else(|e| e.into_inner()).contains(unit)
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.restarts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(unit.to_string());
        if self
            .failing_restarts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(unit)
        {
            bail!("restart of {} failed", unit);
        }
        self.set_active(unit, true);
        Ok(())
    }
}

/// Health endpoints that pass unless marked failing
#[derive(Default)]
pub struct FakeHealthProbe {
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    calls: AtomicUsize,
}

impl FakeHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, url: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(url.to_string());
        } else {
            set.remove(url);
        }
    }

    pub fn set_all_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeHealthProbe {
    async fn check(&self, url: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst)
            || self.failing.lock().unwrap_or_else(|e| e.into_inner()).contains(url)
        {
            bail!("GET {}: connection refused", url);
        }
        Ok(())
    }
}

/// Proxy config that is valid until broken; repair succeeds when allowed
pub struct FakeProxyCheck {
    valid: AtomicBool,
    repairable: AtomicBool,
    repairs: AtomicUsize,
}

impl FakeProxyCheck {
    pub fn new() -> Self {
        Self {
            valid: AtomicBool::new(true),
            repairable: AtomicBool::new(true),
            repairs: AtomicUsize::new(0),
        }
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn set_repairable(&self, repairable: bool) {
        self.repairable.store(repairable, Ordering::SeqCst);
    }

    pub fn repairs(&self) -> usize {
        self.repairs.load(Ordering::SeqCst)
    }
}

impl Default for FakeProxyCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyCheck for FakeProxyCheck {
    async fn verify(&self) -> Result<()> {
        if self.valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            bail!("proxy configuration test failed")
        }
    }

    async fn repair(&self) -> Result<()> {
        self.repairs.fetch_add(1, Ordering::SeqCst);
        if !self.repairable.load(Ordering::SeqCst) {
            bail!("no proxy repair source configured");
        }
        self.set_valid(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_command_proxy_check_reports_failure() {
        let cmd = vec!["sh".to_string(), "-c".to_string(), "echo broken >&2; exit 1".to_string()];
        let check = CommandProxyCheck::new(&cmd, &ProxyConfig::default(), Duration::from_secs(5)).unwrap();
        let err = check.verify().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_command_proxy_check_passes() {
        let cmd = vec!["true".to_string()];
        let check = CommandProxyCheck::new(&cmd, &ProxyConfig::default(), Duration::from_secs(5)).unwrap();
        assert!(check.verify().await.is_ok());
    }

    #[tokio::test]
    async fn test_repair_restores_known_good_copy() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("site.conf");
        let good = dir.path().join("site.conf.good");
        std::fs::write(&live, "garbage").unwrap();
        std::fs::write(&good, "server { listen 80; }").unwrap();

        let config = ProxyConfig {
            test_command: None,
            config_path: Some(live.clone()),
            repair_source: Some(good),
        };
        let check = CommandProxyCheck::new(&["true".to_string()], &config, Duration::from_secs(5)).unwrap();
        check.repair().await.unwrap();
        assert_eq!(std::fs::read_to_string(&live).unwrap(), "server { listen 80; }");
    }

    #[tokio::test]
    async fn test_repair_without_source_fails() {
        let check =
            CommandProxyCheck::new(&["true".to_string()], &ProxyConfig::default(), Duration::from_secs(5)).unwrap();
        assert!(check.repair().await.is_err());
    }

    #[tokio::test]
    async fn test_fake_services_restart_activates() {
        let services = FakeServices::new();
        services.set_active("wardend.service", false);
        assert!(!services.is_active("wardend.service").await);
        services.restart("wardend.service").await.unwrap();
        assert!(services.is_active("wardend.service").await);
        assert_eq!(services.restart_count("wardend.service"), 1);
    }
}
