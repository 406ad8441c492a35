//! Thin `systemctl` wrapper with a hard timeout on every call.

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Upper bound for any shelled-out command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Unit status as reported by systemd, strings kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit: String,
    pub enabled: String,
    pub active: String,
}

#[derive(Debug, Clone)]
pub struct Systemctl {
    timeout: Duration,
}

impl Systemctl {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `systemctl is-active <unit>` output, e.g. "active" or "failed"
    pub async fn is_active(&self, unit: &str) -> Result<String> {
        let output = run_command("systemctl", &["is-active", unit], self.timeout).await?;
        Ok(stdout_or_stderr(&output))
    }

    /// `systemctl is-enabled <unit>` output, e.g. "enabled" or "disabled"
    pub async fn is_enabled(&self, unit: &str) -> Result<String> {
        let output = run_command("systemctl", &["is-enabled", unit], self.timeout).await?;
        Ok(stdout_or_stderr(&output))
    }

    /// Both strings; failures to query are reported in place of the value
    pub async fn status(&self, unit: &str) -> UnitStatus {
        let enabled = self
            .is_enabled(unit)
            .await
            .unwrap_or_else(|e| format!("unknown ({})", e));
        let active = self
            .is_active(unit)
            .await
            .unwrap_or_else(|e| format!("unknown ({})", e));
        UnitStatus {
            unit: unit.to_string(),
            enabled,
            active,
        }
    }

    pub async fn restart(&self, unit: &str) -> Result<()> {
        info!("[SYSTEMD] Restarting {}", unit);
        self.checked("restart", unit).await
    }

    pub async fn start(&self, unit: &str) -> Result<()> {
        info!("[SYSTEMD] Starting {}", unit);
        self.checked("start", unit).await
    }

    async fn checked(&self, verb: &str, unit: &str) -> Result<()> {
        let output = run_command("systemctl", &[verb, unit], self.timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(WardenError::CommandFailed {
                command: format!("systemctl {} {}", verb, unit),
                detail: stdout_or_stderr(&output),
            })
        }
    }
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

/// Run a command, killing it if it outlives `timeout`.
///
/// A non-zero exit is not an error here; callers decide what it means.
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
    let rendered = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("[CMD] {}", rendered);

    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(WardenError::CommandFailed {
            command: rendered,
            detail: e.to_string(),
        }),
        Err(_) => Err(WardenError::CommandTimeout {
            command: rendered,
            secs: timeout.as_secs(),
        }),
    }
}

fn stdout_or_stderr(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_times_out() {
        let result = run_command("sleep", &["5"], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(WardenError::CommandTimeout { .. })));
    }

    #[tokio::test]
    async fn test_run_command_missing_binary() {
        let result = run_command(
            "warden-definitely-not-installed",
            &[],
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(WardenError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_run_command_reports_exit_status() {
        let output = run_command("sh", &["-c", "echo inactive; exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.status.success());
        assert_eq!(stdout_or_stderr(&output), "inactive");
    }
}
