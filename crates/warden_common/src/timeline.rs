//! Health transition timeline.
//!
//! Append-only JSONL store; once it grows past its cap the oldest lines are
//! dropped by an atomic rewrite.

use crate::atomic::write_atomic;
use crate::error::Result;
use crate::health::HealthState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Entries returned when the caller gives no limit
pub const DEFAULT_TIMELINE_LIMIT: usize = 50;

/// Largest limit a caller may ask for
pub const MAX_TIMELINE_LIMIT: usize = 500;

/// Default retained line count
pub const DEFAULT_TIMELINE_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub state: HealthState,
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct HealthTimeline {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl HealthTimeline {
    pub fn new(path: impl AsRef<Path>, max_entries: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &HealthTimelineEntry) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        drop(file);

        self.trim_to_capacity()
    }

    /// Most recent entries, oldest first
    pub fn recent(&self, limit: Option<usize>) -> Result<Vec<HealthTimelineEntry>> {
        let limit = clamp_limit(limit);
        let mut entries = self.read_all()?;
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    pub fn read_all(&self) -> Result<Vec<HealthTimelineEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HealthTimelineEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("[TIMELINE] Skipping malformed line: {}", e),
            }
        }
        Ok(entries)
    }

    fn trim_to_capacity(&self) -> Result<()> {
        let entries = self.read_all()?;
        if entries.len() <= self.max_entries {
            return Ok(());
        }

        let keep = &entries[entries.len() - self.max_entries..];
        let mut buf = Vec::new();
        for entry in keep {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        write_atomic(&self.path, &buf)
    }
}

/// Apply the default and the ceiling to a caller-supplied limit
pub fn clamp_limit(limit: Option<usize>) -> usize {
    match limit {
        None | Some(0) => DEFAULT_TIMELINE_LIMIT,
        Some(n) => n.min(MAX_TIMELINE_LIMIT),
    }
}
