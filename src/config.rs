use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{BlockextError, BlockextResult};

/// Host settings for the extension manager and dispatch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Deadline for a worker to report an extension's descriptor.
    pub load_timeout_ms: u64,
    /// Deadline for a call to a worker-hosted opcode or menu.
    pub call_timeout_ms: u64,
    /// Load every async extension into one shared worker.
    pub share_worker: bool,
    pub max_workers: usize,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 5000,
            call_timeout_ms: 5000,
            share_worker: false,
            max_workers: 8,
            log_filter: "blockext=info".to_string(),
        }
    }
}

impl HostConfig {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("blockext")
            .join("config.toml")
    }

    /// Load config from the default path, or return defaults if it is
    /// missing or unreadable
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> BlockextResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> BlockextResult<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.validate();
        Ok(config)
    }

    /// Validate and clamp config values to acceptable ranges
    fn validate(&mut self) {
        // 10 ms - 10 min
        self.load_timeout_ms = self.load_timeout_ms.clamp(10, 600_000);
        self.call_timeout_ms = self.call_timeout_ms.clamp(10, 600_000);

        self.max_workers = self.max_workers.clamp(1, 64);

        if self.log_filter.trim().is_empty() {
            self.log_filter = Self::default().log_filter;
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> BlockextResult<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| BlockextError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&path, content)?;
        Ok(())
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.load_timeout(), Duration::from_secs(5));
        assert_eq!(config.call_timeout(), Duration::from_secs(5));
        assert!(!config.share_worker);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.log_filter, "blockext=info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HostConfig::from_toml_str("share_worker = true\ncall_timeout_ms = 250\n").unwrap();
        assert!(config.share_worker);
        assert_eq!(config.call_timeout_ms, 250);
        assert_eq!(config.load_timeout_ms, 5000);
    }

    #[test]
    fn test_validate_clamps() {
        let config =
            HostConfig::from_toml_str("load_timeout_ms = 0\nmax_workers = 1000\nlog_filter = \"  \"\n").unwrap();
        assert_eq!(config.load_timeout_ms, 10);
        assert_eq!(config.max_workers, 64);
        assert_eq!(config.log_filter, "blockext=info");
    }

    #[test]
    fn test_invalid_toml() {
        let err = HostConfig::from_toml_str("max_workers = \"many\"").unwrap_err();
        assert!(matches!(err, BlockextError::TomlParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_workers = 2").unwrap();

        let config = HostConfig::load_from(file.path()).unwrap();
        assert_eq!(config.max_workers, 2);

        let missing = file.path().with_extension("missing");
        assert!(matches!(HostConfig::load_from(&missing), Err(BlockextError::Io(_))));
    }
}
