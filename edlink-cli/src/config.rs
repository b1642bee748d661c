//! Configuration file support for edlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (EDLINK_*)
//! 3. Local config file (./edlink.toml)
//! 4. Global config file (~/.config/edlink/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbId {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbId {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM5").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbId>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("edlink.toml")) {
            debug!("Loaded local config from edlink.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "edlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        self.port.usb_device.extend(other.port.usb_device);
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbId { vid, pid };

        // Don't add duplicates
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        // Save next to an existing local config, otherwise globally
        let path = if Path::new("edlink.toml").exists() {
            PathBuf::from("edlink.toml")
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from("edlink.toml")
        };

        self.port.usb_device.push(device);

        let content = toml::to_string_pretty(&self)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.connection.baud.is_none());
        assert!(config.port.usb_device.is_empty());
    }

    #[test]
    fn test_usb_id_matches() {
        let device = UsbId {
            vid: 0x0403,
            pid: 0x6001,
        };
        assert!(device.matches(0x0403, 0x6001));
        assert!(!device.matches(0x0403, 0x6014));
        assert!(!device.matches(0x10C4, 0x6001));
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [port.connection]
            serial = "/dev/ttyUSB0"
            baud = 9600

            [[port.usb_device]]
            vid = 0x0403
            pid = 0x6001
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.port.connection.baud, Some(9600));
        assert_eq!(config.port.usb_device.len(), 1);
        assert!(config.port.usb_device[0].matches(0x0403, 0x6001));
    }

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_merge_overrides_connection() {
        let mut base: Config = toml::from_str(
            r#"
            [port.connection]
            serial = "/dev/ttyUSB0"
        "#,
        )
        .unwrap();
        let overlay: Config = toml::from_str(
            r#"
            [port.connection]
            serial = "COM5"
            baud = 115200
        "#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.port.connection.serial.as_deref(), Some("COM5"));
        assert_eq!(base.port.connection.baud, Some(115200));
    }

    #[test]
    fn test_merge_keeps_base_when_overlay_empty() {
        let mut base: Config = toml::from_str(
            r#"
            [port.connection]
            serial = "/dev/ttyUSB0"
            baud = 9600
        "#,
        )
        .unwrap();
        base.merge(Config::default());
        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.port.connection.baud, Some(9600));
    }

    #[test]
    fn test_merge_extends_usb_devices() {
        let mut base: Config = toml::from_str(
            r#"
            [[port.usb_device]]
            vid = 0x0403
            pid = 0x6001
        "#,
        )
        .unwrap();
        let overlay: Config = toml::from_str(
            r#"
            [[port.usb_device]]
            vid = 0x10C4
            pid = 0xEA60
        "#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.port.usb_device.len(), 2);
    }

    #[test]
    fn test_load_from_file_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edlink.toml");
        fs::write(&path, "invalid toml [[[").unwrap();
        assert!(Config::load_from_file(&path).is_none());
    }

    #[test]
    fn test_load_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(Config::load_from_file(&path).is_none());
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = Config::default();
        config.port.connection.serial = Some("COM5".to_string());
        config.port.usb_device.push(UsbId {
            vid: 0x0403,
            pid: 0x6014,
        });

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.port.connection.serial.as_deref(), Some("COM5"));
        assert_eq!(parsed.port.usb_device, config.port.usb_device);
    }
}
