//! Durable restart request shared between the engine and the supervisor.
//!
//! The engine writes the record; the supervisor restarts the service and
//! clears it only after the restart is confirmed. Delivery is at-least-once:
//! seeing the same record twice must be harmless, and a record the engine
//! replaced while a restart was in flight is left for the next cycle.

use crate::atomic::write_atomic;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RestartSignal {
    path: PathBuf,
}

impl RestartSignal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a restart request, replacing any pending one
    pub fn request(&self, reason: &str) -> Result<RestartRequest> {
        let request = RestartRequest {
            timestamp: Utc::now(),
            reason: reason.to_string(),
        };
        let json = serde_json::to_vec_pretty(&request)?;
        write_atomic(&self.path, &json)?;
        info!("[RESTART] Restart requested: {}", reason);
        Ok(request)
    }

    /// Pending request, if any.
    ///
    /// An unreadable record still counts as pending: losing a restart is
    /// worse than performing an extra one.
    pub fn pending(&self) -> Result<Option<RestartRequest>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<RestartRequest>(&content) {
            Ok(request) => Ok(Some(request)),
            Err(e) => {
                warn!("[RESTART] Unreadable restart request at {}: {}", self.path.display(), e);
                let timestamp = fs::metadata(&self.path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some(RestartRequest {
                    timestamp,
                    reason: "unreadable restart request".to_string(),
                }))
            }
        }
    }

    /// Remove the record if it is still the one that was acted on.
    ///
    /// Returns false when a newer request replaced it in the meantime.
    pub fn clear_if_matches(&self, consumed: &RestartRequest) -> Result<bool> {
        match self.pending()? {
            Some(current) if current == *consumed => {
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }
}
