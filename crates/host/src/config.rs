//! Host configuration file
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [backend]
//! order = ["libusb1", "openusb", "libusb0"]
//!
//! [transfer]
//! default_timeout_ms = 1000
//! ```

use crate::backend::BackendKind;
use crate::device::DEFAULT_TIMEOUT_MS;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Names a single backend to use instead of the configured order
pub const BACKEND_ENV_VAR: &str = "USB_HOST_BACKEND";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Backends to probe, most preferred first
    #[serde(default = "BackendSettings::default_order")]
    pub order: Vec<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            order: Self::default_order(),
        }
    }
}

impl BackendSettings {
    fn default_order() -> Vec<String> {
        BackendKind::PRIORITY
            .iter()
            .map(|k| k.name().to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Timeout given to newly discovered devices
    #[serde(default = "TransferSettings::default_timeout")]
    pub default_timeout_ms: u32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: Self::default_timeout(),
        }
    }
}

impl TransferSettings {
    fn default_timeout() -> u32 {
        DEFAULT_TIMEOUT_MS
    }
}

impl HostConfig {
    /// Load configuration from `path`, or from the first standard location
    /// that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/usb-host/host.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-host").join("host.toml")
        } else {
            PathBuf::from(".config/usb-host/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !common::is_valid_level(&self.logging.level) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                common::LOG_LEVELS.join(", ")
            ));
        }

        if self.backend.order.is_empty() {
            return Err(anyhow!("Backend order must name at least one backend"));
        }

        let mut seen = HashSet::new();
        for name in &self.backend.order {
            let kind: BackendKind = name
                .parse()
                .map_err(|_| anyhow!("Unknown backend '{}' in backend order", name))?;
            if !seen.insert(kind) {
                return Err(anyhow!("Backend '{}' listed more than once", name));
            }
        }

        Ok(())
    }

    /// Backend probe order, honouring the `USB_HOST_BACKEND` override
    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        let var = std::env::var(BACKEND_ENV_VAR).ok();
        self.backend_kinds_with_override(var.as_deref())
    }

    fn backend_kinds_with_override(&self, env_override: Option<&str>) -> Vec<BackendKind> {
        if let Some(name) = env_override {
            match name.parse() {
                Ok(kind) => return vec![kind],
                Err(_) => warn!("Ignoring {}={}: unknown backend", BACKEND_ENV_VAR, name),
            }
        }
        // Unknown names are reported by validate(); skip them here
        self.backend
            .order
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.transfer.default_timeout_ms, 1000);
        assert_eq!(config.backend.order, vec!["libusb1", "openusb", "libusb0"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: HostConfig = toml::from_str("[transfer]\ndefault_timeout_ms = 250\n").unwrap();
        assert_eq!(config.transfer.default_timeout_ms, 250);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.backend.order.len(), 3);
    }

    #[test]
    fn test_validate_backend_order() {
        let mut config = HostConfig::default();

        config.backend.order = vec![];
        assert!(config.validate().is_err());

        config.backend.order = vec!["libusb1".into(), "libusb1".into()];
        assert!(config.validate().is_err());

        config.backend.order = vec!["winusb".into()];
        assert!(config.validate().is_err());

        config.backend.order = vec!["libusb0".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = HostConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_override() {
        let config = HostConfig::default();
        assert_eq!(
            config.backend_kinds_with_override(Some("openusb")),
            vec![BackendKind::OpenUsb]
        );
        assert_eq!(
            config.backend_kinds_with_override(Some("bogus")),
            BackendKind::PRIORITY.to_vec()
        );
        assert_eq!(
            config.backend_kinds_with_override(None),
            BackendKind::PRIORITY.to_vec()
        );
    }
}
