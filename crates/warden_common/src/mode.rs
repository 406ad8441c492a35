//! Operating mode of the controlled device.
//!
//! Mode strings arrive from environment variables, hand-edited documents and
//! older config formats, so parsing is forgiving about case and decoration
//! (`"LIVE (hardware)"`, `"Mock-mode"`). Loading coerces anything unknown to
//! [`OperatingMode::Mock`], which never touches the real device.

use crate::error::WardenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Simulated device, no network traffic
    #[default]
    Mock,
    /// Real device, probes and writes perform network I/O
    Live,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Live => "live",
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Mock)
    }

    /// Strict parse, `None` for anything unrecognized
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "mock" | "simulated" | "sim" => Some(Self::Mock),
            "live" | "real" => Some(Self::Live),
            _ => None,
        }
    }

    /// Lenient parse used while loading configuration.
    ///
    /// Returns the safe default plus a warning when the value is not
    /// recognized.
    pub fn coerce(raw: &str) -> (Self, Option<String>) {
        match Self::parse(raw) {
            Some(mode) => (mode, None),
            None => {
                let fallback = Self::default();
                (
                    fallback,
                    Some(format!(
                        "unrecognized mode '{}', falling back to '{}'",
                        raw.trim(),
                        fallback
                    )),
                )
            }
        }
    }
}

/// Lower-case the value and keep only its leading word
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            WardenError::InvalidConfig(format!(
                "unrecognized mode '{}' (expected 'mock' or 'live')",
                s.trim()
            ))
        })
    }
}
