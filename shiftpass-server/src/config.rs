//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    /// Shown to employees when they pair.
    pub company_name: String,
    /// Base URL devices use to reach this domain; printed in pairing links.
    pub public_url: String,
    /// Accepted clock skew, and lifetime of seen nonces.
    pub replay_window_secs: i64,
    /// How long a superseded key keeps verifying after re-pairing. 0 = strict cut-over.
    pub key_rotation_grace_secs: i64,
    pub max_payload_size: usize,
    pub registration_ttl_secs: i64,
    pub cleanup_interval_secs: u64,
    pub history_page_limit: u32,
    pub workplace_radius_m: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8744".to_string(),
            storage_path: PathBuf::from("shiftpass.db"),
            company_name: "ShiftPass".to_string(),
            public_url: "http://127.0.0.1:8744".to_string(),
            replay_window_secs: 300,
            key_rotation_grace_secs: 0,
            max_payload_size: 65_536,
            registration_ttl_secs: 86_400,
            cleanup_interval_secs: 60,
            history_page_limit: 100,
            workplace_radius_m: 250.0,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.replay_window_secs <= 0 {
            anyhow::bail!("replay_window_secs must be positive");
        }
        if self.key_rotation_grace_secs < 0 {
            anyhow::bail!("key_rotation_grace_secs must not be negative");
        }
        if self.history_page_limit == 0 {
            anyhow::bail!("history_page_limit must be positive");
        }
        Ok(())
    }
}
