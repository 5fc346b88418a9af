//! Device-side configuration.

use crate::platform;
use crate::{Result, ShiftpassError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration loaded from `shiftpass.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-domain request timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub vault_path: PathBuf,
    pub device_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            vault_path: platform::get_default_vault_path(),
            device_name: platform::default_device_name(),
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| ShiftpassError::Protocol(format!("Invalid config {:?}: {}", path, e)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn vault_key_path(&self) -> PathBuf {
        platform::vault_key_path_for(&self.vault_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_millis(5000));
        assert!(config.vault_key_path().ends_with("vault.key"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.request_timeout_ms, 5000);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shiftpass.toml");
        std::fs::write(&path, "request_timeout_ms = 1500\ndevice_name = \"front-phone\"\n").unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.request_timeout_ms, 1500);
        assert_eq!(config.device_name, "front-phone");
        assert_eq!(config.vault_path, platform::get_default_vault_path());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shiftpass.toml");
        std::fs::write(&path, "request_timeout_ms = \"soon\"").unwrap();
        assert!(ClientConfig::load(&path).is_err());
    }
}
