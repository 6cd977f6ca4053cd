use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSettings {
    /// Path to the device-bridge executable as supplied by the
    /// platform-tools resolver; empty means "use `adb` from PATH".
    pub command_path: String,
    pub command_timeout_secs: u64,
    pub directory_pull_timeout_secs: u64,
    pub device_hash_timeout_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            command_path: String::new(),
            command_timeout_secs: 30,
            directory_pull_timeout_secs: 120,
            device_hash_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSettings {
    /// Root of the writable card on the device.
    pub base_path: String,
    pub name_index_url: String,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            base_path: "/mnt/SDCARD".to_string(),
            name_index_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSettings {
    pub max_history_size: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            max_history_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HANDHELD_BRIDGE_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".handheld_bridge_config.json")
}

pub fn backup_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".handheld_bridge_config.backup.json")
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    if config.bridge.command_timeout_secs == 0 {
        config.bridge.command_timeout_secs = 30;
    }
    if config.bridge.directory_pull_timeout_secs < config.bridge.command_timeout_secs {
        // A pull budget below the per-command budget is an inversion; the
        // clamp must stay at or above the command timeout itself.
        config.bridge.directory_pull_timeout_secs = config.bridge.command_timeout_secs.max(120);
    }
    if config.bridge.device_hash_timeout_secs == 0 {
        config.bridge.device_hash_timeout_secs = 10;
    }
    // The audit log never holds more than 50 live entries.
    if config.audit.max_history_size == 0 || config.audit.max_history_size > 50 {
        config.audit.max_history_size = 50;
    }
    if config.transfer.base_path.trim().is_empty() {
        config.transfer.base_path = "/mnt/SDCARD".to_string();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("nope.json")).expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bridge.command_timeout_secs, 30);
        assert_eq!(config.transfer.base_path, "/mnt/SDCARD");
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.bridge.command_timeout_secs = 0;
        config.bridge.directory_pull_timeout_secs = 5;
        config.audit.max_history_size = 500;
        config.transfer.base_path = "  ".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.bridge.command_timeout_secs, 30);
        assert_eq!(validated.bridge.directory_pull_timeout_secs, 120);
        assert_eq!(validated.audit.max_history_size, 50);
        assert_eq!(validated.transfer.base_path, "/mnt/SDCARD");
    }

    #[test]
    fn pull_timeout_clamp_never_drops_below_command_timeout() {
        let mut config = AppConfig::default();
        config.bridge.command_timeout_secs = 200;
        config.bridge.directory_pull_timeout_secs = 150;
        let validated = validate_config(config);
        assert_eq!(validated.bridge.directory_pull_timeout_secs, 200);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");
        let mut config = AppConfig::default();
        config.bridge.command_path = "/opt/platform-tools/adb".to_string();
        save_config_to_path(&config, &path, &backup).expect("save");
        let loaded = load_config_from_path(&path).expect("load");
        assert_eq!(loaded.bridge.command_path, "/opt/platform-tools/adb");
        // Saving again backs up the previous file.
        save_config_to_path(&loaded, &path, &backup).expect("save again");
        assert!(backup.exists());
    }

    #[test]
    fn partial_config_fills_missing_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"bridge": {"command_path": "adb", "command_timeout_secs": 15, "directory_pull_timeout_secs": 120, "device_hash_timeout_secs": 10}}"#)
            .expect("write");
        let loaded = load_config_from_path(&path).expect("load");
        assert_eq!(loaded.bridge.command_timeout_secs, 15);
        assert_eq!(loaded.audit.max_history_size, 50);
    }
}
