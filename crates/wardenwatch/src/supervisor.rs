//! Supervisor cycle.
//!
//! One cycle, in order: unit liveness, proxy config, pending restart
//! request, core health probe, then streak bookkeeping (last-known-good
//! and rollback). The supervisor is the only component that restarts
//! units or moves the deployment link.

use crate::checks::{HealthProbe, ProxyCheck, ServiceControl};
use crate::config::WatchConfig;
use crate::deploy::Deployments;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warden_common::atomic::write_atomic;
use warden_common::{LastKnownGood, RestartSignal, StatePaths};

/// Persisted across watchdog restarts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    /// Last rollback attempt, successful or not
    #[serde(default)]
    pub last_rollback_at: Option<DateTime<Utc>>,
}

impl WatchState {
    /// Missing or unreadable state starts fresh
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("[WATCH] Ignoring unreadable {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> warden_common::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
    }
}

/// In-memory streak counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Consecutive cycles where both health endpoints failed
    pub health_failures: u32,
    /// Consecutive cycles where every check passed
    pub good_streak: u32,
    /// Consecutive cycles where any check failed
    pub fail_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestHandling {
    NonePending,
    /// Core restarted, confirmed active and the request cleared
    Consumed,
    /// Core restarted and confirmed active, but a newer request replaced
    /// the one consumed; it is handled next cycle
    Replaced,
    /// Restart failed or could not be confirmed; left in place for the
    /// next cycle
    Retained { reason: String },
}

impl RequestHandling {
    /// False when a pending restart could not be carried out
    pub fn is_ok(&self) -> bool {
        !matches!(self, RequestHandling::Retained { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    NotNeeded,
    Performed { target: PathBuf },
    Suppressed { remaining_secs: i64 },
    NoTarget,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub units_ok: bool,
    pub units_restarted: Vec<String>,
    pub proxy_ok: bool,
    pub proxy_repaired: bool,
    pub restart_request: RequestHandling,
    pub restart_request_ok: bool,
    pub health_ok: bool,
    pub core_restarted: bool,
    pub lkg_written: bool,
    pub rollback: RollbackOutcome,
    pub counters: Counters,
}

impl CycleReport {
    pub fn all_ok(&self) -> bool {
        self.units_ok && self.proxy_ok && self.restart_request_ok && self.health_ok
    }
}

pub struct Supervisor {
    config: WatchConfig,
    services: Arc<dyn ServiceControl>,
    health: Arc<dyn HealthProbe>,
    proxy: Arc<dyn ProxyCheck>,
    deployments: Deployments,
    restart: RestartSignal,
    lkg_path: PathBuf,
    state_path: PathBuf,
    state: WatchState,
    counters: Counters,
}

impl Supervisor {
    pub fn new(
        config: WatchConfig,
        paths: &StatePaths,
        services: Arc<dyn ServiceControl>,
        health: Arc<dyn HealthProbe>,
        proxy: Arc<dyn ProxyCheck>,
    ) -> Self {
        let state_path = paths.watch_state();
        let state = WatchState::load(&state_path);
        let deployments = Deployments::new(&config.deploy.current_link, &config.deploy.releases_dir);
        Self {
            config,
            services,
            health,
            proxy,
            deployments,
            restart: RestartSignal::new(paths.restart_request()),
            lkg_path: paths.last_known_good(),
            state_path,
            state,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn watch_state(&self) -> &WatchState {
        &self.state
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// One cycle with an explicit clock, for cooldown arithmetic
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> CycleReport {
        let (units_ok, units_restarted) = self.check_units().await;
        let (proxy_ok, proxy_repaired) = self.check_proxy().await;
        let restart_request = self.handle_restart_request().await;
        let (health_ok, core_restarted) = self.check_health().await;

        let mut report = CycleReport {
            timestamp: now,
            units_ok,
            units_restarted,
            proxy_ok,
            proxy_repaired,
            restart_request_ok: restart_request.is_ok(),
            restart_request,
            health_ok,
            core_restarted,
            lkg_written: false,
            rollback: RollbackOutcome::NotNeeded,
            counters: self.counters,
        };

        if report.all_ok() {
            self.counters.good_streak = self.counters.good_streak.saturating_add(1);
            self.counters.fail_streak = 0;
            if self.counters.good_streak >= self.config.streaks.lkg_streak {
                report.lkg_written = self.record_last_known_good();
            }
        } else {
            self.counters.good_streak = 0;
            self.counters.fail_streak = self.counters.fail_streak.saturating_add(1);
            warn!(
                "[WATCH] Cycle degraded (fail streak {}/{})",
                self.counters.fail_streak, self.config.streaks.rollback_streak
            );
            if self.counters.fail_streak >= self.config.streaks.rollback_streak {
                report.rollback = self.attempt_rollback(now).await;
            }
        }

        report.counters = self.counters;
        report
    }

    /// All units active on entry; inactive ones are restarted on the spot
    async fn check_units(&self) -> (bool, Vec<String>) {
        let mut all_active = true;
        let mut restarted = Vec::new();
        for unit in &self.config.units {
            if self.services.is_active(unit).await {
                continue;
            }
            all_active = false;
            warn!("[WATCH] {} is not active, restarting", unit);
            match self.services.restart(unit).await {
                Ok(()) => restarted.push(unit.clone()),
                Err(e) => error!("[WATCH] Failed to restart {}: {:#}", unit, e),
            }
        }
        (all_active, restarted)
    }

    async fn check_proxy(&self) -> (bool, bool) {
        let err = match self.proxy.verify().await {
            Ok(()) => return (true, false),
            Err(e) => e,
        };
        warn!("[WATCH] Proxy configuration check failed: {:#}", err);

        if let Err(e) = self.proxy.repair().await {
            error!("[WATCH] Proxy repair unavailable, continuing degraded: {:#}", e);
            return (false, false);
        }
        match self.proxy.verify().await {
            Ok(()) => {
                info!("[WATCH] Proxy configuration repaired");
                (false, true)
            }
            Err(e) => {
                error!("[WATCH] Proxy still invalid after repair, continuing degraded: {:#}", e);
                (false, false)
            }
        }
    }

    async fn handle_restart_request(&self) -> RequestHandling {
        let request = match self.restart.pending() {
            Ok(Some(request)) => request,
            Ok(None) => return RequestHandling::NonePending,
            Err(e) => {
                error!("[WATCH] Cannot read restart request: {}", e);
                return RequestHandling::Retained {
                    reason: e.to_string(),
                };
            }
        };

        let unit = &self.config.core_unit;
        info!("[WATCH] Restart requested ({}), restarting {}", request.reason, unit);
        if let Err(e) = self.services.restart(unit).await {
            error!("[WATCH] Restart of {} failed, will retry: {:#}", unit, e);
            return RequestHandling::Retained {
                reason: format!("{:#}", e),
            };
        }
        if !self.services.is_active(unit).await {
            error!("[WATCH] {} not active after restart, will retry", unit);
            return RequestHandling::Retained {
                reason: format!("{} not active after restart", unit),
            };
        }

        match self.restart.clear_if_matches(&request) {
            Ok(true) => RequestHandling::Consumed,
            Ok(false) => {
                info!("[WATCH] Restart request replaced during restart, handling it next cycle");
                RequestHandling::Replaced
            }
            Err(e) => {
                error!("[WATCH] Failed to clear restart request: {}", e);
                RequestHandling::Retained {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Primary endpoint, then fallback. Returns (healthy, core restarted).
    async fn check_health(&mut self) -> (bool, bool) {
        let health = &self.config.health;
        let primary = self.health.check(&health.primary_url).await;
        let healthy = match primary {
            Ok(()) => true,
            Err(e) => {
                debug!("[WATCH] Primary health check failed: {:#}", e);
                match self.health.check(&health.fallback_url).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("[WATCH] Health checks failed: {:#}", e);
                        false
                    }
                }
            }
        };

        if healthy {
            self.counters.health_failures = 0;
            return (true, false);
        }

        self.counters.health_failures = self.counters.health_failures.saturating_add(1);
        if self.counters.health_failures < health.restart_threshold {
            return (false, false);
        }

        let unit = self.config.core_unit.clone();
        warn!(
            "[WATCH] {} consecutive health failures, restarting {}",
            self.counters.health_failures, unit
        );
        self.counters.health_failures = 0;
        match self.services.restart(&unit).await {
            Ok(()) => (false, true),
            Err(e) => {
                error!("[WATCH] Failed to restart {}: {:#}", unit, e);
                (false, false)
            }
        }
    }

    /// Write last-known-good when the active deployment differs from the record
    fn record_last_known_good(&self) -> bool {
        let active = match self.deployments.active() {
            Ok(path) => path,
            Err(e) => {
                warn!("[WATCH] Cannot resolve active deployment: {:#}", e);
                return false;
            }
        };

        match LastKnownGood::load(&self.lkg_path) {
            Ok(Some(existing)) if existing.deployment_path == active => return false,
            Ok(_) => {}
            Err(e) => warn!("[WATCH] Replacing unreadable last-known-good record: {}", e),
        }

        let record = LastKnownGood::new(&active, &Deployments::version_of(&active));
        match record.save(&self.lkg_path) {
            Ok(()) => {
                info!(
                    "[WATCH] Last-known-good: {} ({})",
                    active.display(),
                    record.version
                );
                true
            }
            Err(e) => {
                error!("[WATCH] Failed to write last-known-good: {}", e);
                false
            }
        }
    }

    async fn attempt_rollback(&mut self, now: DateTime<Utc>) -> RollbackOutcome {
        let cooldown = self.config.rollback_cooldown();
        if let Some(last) = self.state.last_rollback_at {
            let elapsed = now.signed_duration_since(last);
            if elapsed < cooldown {
                let remaining_secs = (cooldown - elapsed).num_seconds();
                warn!(
                    "[WATCH] Rollback suppressed by cooldown ({}s remaining)",
                    remaining_secs
                );
                return RollbackOutcome::Suppressed { remaining_secs };
            }
        }

        self.state.last_rollback_at = Some(now);
        if let Err(e) = self.state.save(&self.state_path) {
            error!("[WATCH] Failed to persist watch state: {}", e);
        }

        let lkg = match LastKnownGood::load(&self.lkg_path) {
            Ok(lkg) => lkg,
            Err(e) => {
                warn!("[WATCH] Ignoring unreadable last-known-good record: {}", e);
                None
            }
        };

        let target = match self.deployments.rollback_target(lkg.as_ref()) {
            Ok(Some(target)) => target,
            Ok(None) => {
                error!("[WATCH] Rollback needed but no target deployment exists");
                return RollbackOutcome::NoTarget;
            }
            Err(e) => {
                error!("[WATCH] Cannot choose rollback target: {:#}", e);
                return RollbackOutcome::Failed {
                    error: format!("{:#}", e),
                };
            }
        };

        warn!(
            "[WATCH] {} consecutive degraded cycles, rolling back to {}",
            self.counters.fail_streak,
            target.display()
        );
        if let Err(e) = self.deployments.switch_to(&target) {
            error!("[WATCH] Rollback failed: {:#}", e);
            return RollbackOutcome::Failed {
                error: format!("{:#}", e),
            };
        }

        for unit in &self.config.units {
            if let Err(e) = self.services.restart(unit).await {
                error!("[WATCH] Failed to restart {} after rollback: {:#}", unit, e);
            }
        }

        self.counters = Counters::default();
        RollbackOutcome::Performed { target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_watch_state_round_trip_and_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watch_state.json");
        assert_eq!(WatchState::load(&path), WatchState::default());

        let state = WatchState {
            last_rollback_at: Some(Utc::now()),
        };
        state.save(&path).unwrap();
        assert_eq!(WatchState::load(&path), state);

        std::fs::write(&path, "{{{").unwrap();
        assert_eq!(WatchState::load(&path), WatchState::default());
    }

    #[test]
    fn test_report_serializes_tagged_outcomes() {
        let json = serde_json::to_value(RollbackOutcome::Suppressed { remaining_secs: 60 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "suppressed", "remaining_secs": 60}));
    }
}
