//! Deployment layout: a `current` symlink pointing into a releases directory.
//!
//! Release directory names sort oldest to newest (timestamps or zero-padded
//! versions). A release may carry a `VERSION` file; otherwise its directory
//! name is the version.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use warden_common::LastKnownGood;

#[derive(Debug, Clone)]
pub struct Deployments {
    current_link: PathBuf,
    releases_dir: PathBuf,
}

impl Deployments {
    pub fn new(current_link: impl AsRef<Path>, releases_dir: impl AsRef<Path>) -> Self {
        Self {
            current_link: current_link.as_ref().to_path_buf(),
            releases_dir: releases_dir.as_ref().to_path_buf(),
        }
    }

    pub fn current_link(&self) -> &Path {
        &self.current_link
    }

    /// Resolved target of the `current` link
    pub fn active(&self) -> Result<PathBuf> {
        fs::canonicalize(&self.current_link)
            .with_context(|| format!("Failed to resolve {}", self.current_link.display()))
    }

    /// Release directories, newest first
    pub fn releases(&self) -> Result<Vec<PathBuf>> {
        let root = fs::canonicalize(&self.releases_dir)
            .with_context(|| format!("Failed to resolve {}", self.releases_dir.display()))?;
        let mut releases = Vec::new();
        for entry in fs::read_dir(&root).with_context(|| format!("Failed to list {}", root.display()))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                releases.push(entry.path());
            }
        }
        releases.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(releases)
    }

    pub fn version_of(path: &Path) -> String {
        if let Ok(version) = fs::read_to_string(path.join("VERSION")) {
            let version = version.trim();
            if !version.is_empty() {
                return version.to_string();
            }
        }
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    /// Where a rollback should point.
    ///
    /// The last-known-good deployment when it still exists and is not the
    /// active one; otherwise the release just older than the active one
    /// (or the newest release when the active one is not a known release).
    pub fn rollback_target(&self, lkg: Option<&LastKnownGood>) -> Result<Option<PathBuf>> {
        let active = self.active().ok();

        if let Some(lkg) = lkg {
            if let Ok(candidate) = fs::canonicalize(&lkg.deployment_path) {
                if candidate.is_dir() && Some(&candidate) != active.as_ref() {
                    return Ok(Some(candidate));
                }
            }
        }

        let releases = self.releases()?;
        let target = match active {
            Some(active) => match releases.iter().position(|r| *r == active) {
                Some(idx) => releases.get(idx + 1).cloned(),
                None => releases.into_iter().next(),
            },
            None => releases.into_iter().next(),
        };
        Ok(target)
    }

    /// Repoint `current` at `target` with a single rename
    pub fn switch_to(&self, target: &Path) -> Result<()> {
        let parent = self
            .current_link
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = self
            .current_link
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "current".to_string());
        let staging = parent.join(format!(".{}.tmp.{}", name, std::process::id()));

        if fs::symlink_metadata(&staging).is_ok() {
            fs::remove_file(&staging)
                .with_context(|| format!("Failed to remove stale {}", staging.display()))?;
        }
        std::os::unix::fs::symlink(target, &staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        if let Err(e) = fs::rename(&staging, &self.current_link) {
            let _ = fs::remove_file(&staging);
            return Err(e).with_context(|| format!("Failed to replace {}", self.current_link.display()));
        }

        info!(
            "[WATCH] {} -> {}",
            self.current_link.display(),
            target.display()
        );
        Ok(())
    }
}
