//! Platform-specific locations of device state.

use std::path::PathBuf;

const APP_DIR: &str = "ShiftPass";

/// Get the platform-specific data directory for storing application data
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\ShiftPass
/// - macOS: ~/Library/Application Support/ShiftPass
/// - Linux/Other: ~/.local/share/ShiftPass
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the default key vault database path
pub fn get_default_vault_path() -> PathBuf {
    get_data_dir().join("vault.db")
}

/// Path of the vault key that sits next to a vault database.
pub fn vault_key_path_for(vault_path: &std::path::Path) -> PathBuf {
    vault_path.with_extension("key")
}

/// Get the default client config file path
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("shiftpass.toml")
}

/// Host name used as the default device label.
pub fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "shiftpass-device".to_string())
}
