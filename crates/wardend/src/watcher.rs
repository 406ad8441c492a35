//! Config watcher - hot-applies on-disk edits to the configuration document
//!
//! Watches the state directory (not the file: atomic renames replace the
//! inode) and reloads once a burst of events has been quiet for
//! [`DEBOUNCE`].

use crate::engine::Engine;
use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warden_common::paths::{CONFIG_FILE, LEGACY_CONFIG_FILE};
use warden_common::ConfigStore;

pub const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn spawn(store: Arc<ConfigStore>, engine: Engine) -> Result<Self> {
        let root = store.paths().root().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if event.paths.iter().any(|p| is_config_file(p.file_name())) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("[CONFIG] Watch error: {:?}", e),
            }
        })
        .context("Failed to create config watcher")?;

        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        info!("[CONFIG] Watching {} for changes", root.display());

        let task = tokio::spawn(reload_loop(rx, store, engine));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_config_file(name: Option<&OsStr>) -> bool {
    matches!(name.and_then(OsStr::to_str), Some(CONFIG_FILE) | Some(LEGACY_CONFIG_FILE))
}

async fn reload_loop(mut rx: mpsc::UnboundedReceiver<()>, store: Arc<ConfigStore>, engine: Engine) {
    while rx.recv().await.is_some() {
        // Drain the rest of the burst
        while let Ok(Some(())) = tokio::time::timeout(DEBOUNCE, rx.recv()).await {}

        debug!("[CONFIG] Change detected, reloading");
        let store = store.clone();
        let engine = engine.clone();
        let result = tokio::task::spawn_blocking(move || -> warden_common::Result<_> {
            let snapshot = store.load()?;
            for warning in &snapshot.warnings {
                warn!("[CONFIG] {}", warning);
            }
            engine.apply(snapshot)
        })
        .await;

        match result {
            Ok(Ok(outcome)) if outcome.device_changed => {
                info!("[CONFIG] Reloaded: {}", outcome.changes.join(", "))
            }
            Ok(Ok(_)) => debug!("[CONFIG] Reloaded, device unchanged"),
            Ok(Err(e)) => error!("[CONFIG] Reload rejected, keeping previous configuration: {}", e),
            Err(e) => error!("[CONFIG] Reload task failed: {}", e),
        }
    }
}
