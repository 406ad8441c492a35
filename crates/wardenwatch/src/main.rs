//! wardenwatch - watchdog daemon and inspection CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use warden_common::{LastKnownGood, RestartSignal, VERSION};
use wardenwatch::checks::{proxy_check_from, HttpHealthProbe, SystemdServices};
use wardenwatch::config::DEFAULT_CONFIG_PATH;
use wardenwatch::{Supervisor, WatchConfig, WatchState};

/// Warden watchdog
#[derive(Parser)]
#[command(name = "wardenwatch")]
#[command(about = "Keeps the warden engine alive and rolls back bad deployments", long_about = None)]
#[command(version)]
struct Cli {
    /// Watchdog configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Subcommand (defaults to `run`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervision loop
    Run,
    /// Run a single cycle and print its report as JSON
    Once,
    /// Print last-known-good, pending restart request and watch state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = WatchConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Once => {
            let mut supervisor = build(config)?;
            let report = supervisor.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Status => status(&config),
    }
}

fn build(config: WatchConfig) -> Result<Supervisor> {
    let paths = config.state_paths();
    let services = Arc::new(SystemdServices::new(config.command_timeout()));
    let health = Arc::new(HttpHealthProbe::new(&config.health)?);
    let proxy = proxy_check_from(&config.proxy, config.command_timeout())?;
    Ok(Supervisor::new(config, &paths, services, health, proxy))
}

async fn run(config: WatchConfig) -> Result<()> {
    info!("wardenwatch v{} starting (every {}s)", VERSION, config.interval_secs);
    let mut interval = tokio::time::interval(config.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut supervisor = build(config)?;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = supervisor.run_cycle().await;
                info!(
                    "[WATCH] Cycle done: ok={} good={} fail={}",
                    report.all_ok(),
                    report.counters.good_streak,
                    report.counters.fail_streak
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down gracefully");
                return Ok(());
            }
        }
    }
}

fn status(config: &WatchConfig) -> Result<()> {
    let paths = config.state_paths();
    let lkg = LastKnownGood::load(&paths.last_known_good())
        .context("Failed to read last-known-good record")?;
    let pending = RestartSignal::new(paths.restart_request())
        .pending()
        .context("Failed to read restart request")?;
    let state = WatchState::load(&paths.watch_state());

    let out = json!({
        "state_dir": paths.root(),
        "last_known_good": lkg,
        "restart_request": pending,
        "watch_state": state,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
