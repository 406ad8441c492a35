//! On-disk locations of persisted artifacts.

use std::path::{Path, PathBuf};

/// Default state directory
pub const DEFAULT_STATE_DIR: &str = "/var/lib/warden";

/// Environment variable that relocates the state directory
pub const STATE_DIR_ENV: &str = "WARDEN_STATE_DIR";

/// Versioned operator-edited document
pub const CONFIG_FILE: &str = "config.v2.toml";

/// Pre-v2 document, migrated forward on first read
pub const LEGACY_CONFIG_FILE: &str = "config.json";

pub const RESTART_REQUEST_FILE: &str = "restart_request.json";
pub const TIMELINE_FILE: &str = "health_timeline.jsonl";
pub const LAST_KNOWN_GOOD_FILE: &str = "last_known_good.json";
pub const WATCH_STATE_FILE: &str = "watch_state.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// `$WARDEN_STATE_DIR` or the default
    pub fn from_env() -> Self {
        match std::env::var(STATE_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => Self::new(dir.trim()),
            _ => Self::new(DEFAULT_STATE_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn legacy_config(&self) -> PathBuf {
        self.root.join(LEGACY_CONFIG_FILE)
    }

    pub fn restart_request(&self) -> PathBuf {
        self.root.join(RESTART_REQUEST_FILE)
    }

    pub fn timeline(&self) -> PathBuf {
        self.root.join(TIMELINE_FILE)
    }

    pub fn last_known_good(&self) -> PathBuf {
        self.root.join(LAST_KNOWN_GOOD_FILE)
    }

    pub fn watch_state(&self) -> PathBuf {
        self.root.join(WATCH_STATE_FILE)
    }
}

impl Default for StatePaths {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}
