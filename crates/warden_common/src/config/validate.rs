//! Edit validation. Nothing is written unless this passes.

use super::ConfigEdit;
use crate::error::{Result, WardenError};
use crate::mode::OperatingMode;
use std::net::IpAddr;

/// An edit that passed validation, normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEdit {
    pub mode: OperatingMode,
    pub device_host: String,
    pub device_port: u16,
    pub writable: Option<Vec<String>>,
}

pub fn validate_edit(edit: &ConfigEdit) -> Result<ValidatedEdit> {
    let mode = edit.mode.parse::<OperatingMode>()?;

    let device_host = edit.device_host.trim().to_string();
    if !device_host.is_empty() && !is_valid_host(&device_host) {
        return Err(WardenError::InvalidConfig(format!(
            "device host '{}' is not a valid IP address or hostname",
            device_host
        )));
    }

    let device_port = u16::try_from(edit.device_port).map_err(|_| {
        WardenError::InvalidConfig(format!(
            "device port {} is out of range (1-65535, or 0 to unset)",
            edit.device_port
        ))
    })?;

    let writable = match &edit.writable {
        None => None,
        Some(ids) => {
            let mut normalized: Vec<String> = Vec::with_capacity(ids.len());
            for id in ids {
                let id = id.trim();
                if !is_valid_control_id(id) {
                    return Err(WardenError::InvalidConfig(format!(
                        "writable control id '{}' is invalid",
                        id
                    )));
                }
                if !normalized.iter().any(|existing| existing == id) {
                    normalized.push(id.to_string());
                }
            }
            if normalized.is_empty() {
                return Err(WardenError::EmptyAllowlist);
            }
            Some(normalized)
        }
    };

    Ok(ValidatedEdit {
        mode,
        device_host,
        device_port,
        writable,
    })
}

/// IP literal (optionally bracketed IPv6) or RFC 1123 hostname
pub fn is_valid_host(host: &str) -> bool {
    let unbracketed = host.trim_start_matches('[').trim_end_matches(']');
    if unbracketed.parse::<IpAddr>().is_ok() {
        return true;
    }
    if host.starts_with('[') || host.ends_with(']') {
        return false;
    }

    let name = host.strip_suffix('.').unwrap_or(host);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = name.split('.').collect();
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    // All-numeric names are malformed IP addresses, not hostnames
    let all_numeric = labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit()));

    labels_ok && !all_numeric
}

pub fn is_valid_control_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
