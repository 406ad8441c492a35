//! Error types for warden.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("writable control allowlist is empty")]
    EmptyAllowlist,

    #[error("command `{command}` timed out after {secs}s")]
    CommandTimeout { command: String, secs: u64 },

    #[error("command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

impl WardenError {
    /// True for errors caused by operator input rather than the host
    pub fn is_validation(&self) -> bool {
        matches!(self, WardenError::InvalidConfig(_) | WardenError::EmptyAllowlist)
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
