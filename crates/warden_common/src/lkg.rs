//! Last-known-good deployment record

use crate::atomic::write_atomic;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastKnownGood {
    pub deployment_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl LastKnownGood {
    pub fn new(deployment_path: impl AsRef<Path>, version: &str) -> Self {
        Self {
            deployment_path: deployment_path.as_ref().to_path_buf(),
            timestamp: Utc::now(),
            version: version.to_string(),
        }
    }

    /// Load the record, `None` if it was never written
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
    }
}
