//! Service configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::repository::DEFAULT_STORE_FILE;

/// BLE backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BleSettings {
    /// Defaults to on only in builds with the `ble` feature
    #[serde(default = "default_ble_enabled")]
    pub enabled: bool,
    /// Advertisement listen window
    #[serde(default = "default_ble_timeout_ms")]
    pub timeout_ms: u64,
    /// Adapter to use (substring of its name); first adapter when unset
    #[serde(default)]
    pub adapter: Option<String>,
}

fn default_ble_enabled() -> bool {
    cfg!(feature = "ble")
}

fn default_ble_timeout_ms() -> u64 {
    5000
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            enabled: default_ble_enabled(),
            timeout_ms: default_ble_timeout_ms(),
            adapter: None,
        }
    }
}

impl BleSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for [`SnapshotService`](crate::SnapshotService)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Snapshot store location
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default)]
    pub ble: BleSettings,
    /// usb.ids location; discovered when unset
    #[serde(default)]
    pub usb_ids_path: Option<PathBuf>,
    /// Serial ports whose name contains any of these are ignored
    #[serde(default = "default_skip_patterns")]
    pub port_skip_patterns: Vec<String>,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_FILE)
}

fn default_skip_patterns() -> Vec<String> {
    // Bluetooth ports on macOS, debug/logging ports
    vec!["Bluetooth".to_string(), "debug".to_string()]
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            ble: BleSettings::default(),
            usb_ids_path: None,
            port_skip_patterns: default_skip_patterns(),
        }
    }
}

impl ServiceConfig {
    /// Get the XDG config directory for usbu
    /// Uses $XDG_CONFIG_HOME/usbu on Linux/macOS, falls back to ~/.config/usbu
    pub fn config_dir() -> Option<PathBuf> {
        // First try XDG_CONFIG_HOME environment variable
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("usbu"));
            }
        }

        // Fall back to ~/.config/usbu (XDG default)
        dirs::home_dir().map(|h| h.join(".config").join("usbu"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No config at {} ({}), using defaults", path.display(), e);
                return Self::default();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring unreadable config {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write config: {}", e))?;

        Ok(())
    }
}
