//! wardend - engine core daemon

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use warden_common::{ConfigStore, StatePaths, VERSION};
use wardend::server::{self, AppState};
use wardend::watcher::ConfigWatcher;
use wardend::{Engine, TcpLineSink, TcpProbe};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    info!("wardend v{} starting", VERSION);

    let paths = StatePaths::from_env();
    std::fs::create_dir_all(paths.root())
        .with_context(|| format!("Failed to create {}", paths.root().display()))?;
    let store = Arc::new(ConfigStore::new(paths.clone()));

    let snapshot = store.load().context("Failed to load configuration")?;
    for warning in &snapshot.warnings {
        warn!("[CONFIG] {}", warning);
    }
    info!(
        "[CONFIG] Mode {} (from {:?}/{}), device {}",
        snapshot.mode,
        snapshot.provenance.mode.layer,
        snapshot.provenance.mode.key,
        snapshot.device_address().unwrap_or_else(|| "not configured".to_string())
    );
    let listen_addr = snapshot.engine.listen_addr.clone();

    let engine = Engine::new(snapshot, &paths, Arc::new(TcpProbe), Arc::new(TcpLineSink))
        .context("Refusing to start")?;

    let _watcher = ConfigWatcher::spawn(store.clone(), engine.clone())?;

    let state = AppState::new(engine, store);
    tokio::select! {
        result = server::run(state, &listen_addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down gracefully"),
    }

    Ok(())
}
