//! Atomic file replacement.
//!
//! Content is written to a temporary sibling, flushed to disk, then renamed
//! over the target. Readers see either the old document or the new one.
//! The two steps are exposed separately so callers (and tests) can reason
//! about a crash in between.

use crate::error::Result;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content written next to its target but not yet renamed into place
#[derive(Debug)]
pub struct StagedWrite {
    temp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Rename the staged file over the target
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp_path, &self.target)?;
        self.committed = true;

        // Persist the rename itself; not every filesystem supports it
        if let Some(parent) = self.target.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Write `bytes` to a temporary file in the target's directory
pub fn stage(target: &Path, bytes: &[u8]) -> Result<StagedWrite> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "warden".to_string());
    let temp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = File::create(&temp_path)?;
    let staged = StagedWrite {
        temp_path,
        target: target.to_path_buf(),
        committed: false,
    };
    file.write_all(bytes)?;
    file.sync_all()?;

    Ok(staged)
}

/// Stage and commit in one step
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    stage(target, bytes)?.commit()
}
