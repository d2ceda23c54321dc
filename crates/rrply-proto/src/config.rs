use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub hotkeys: HotkeysConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Remote station endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Landing page; also the prefix for the playlist API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Network slug used in `/_papi/v1/{network}/routines/...`.
    #[serde(default = "default_network")]
    pub network: String,
}

/// Local control socket used by `--toggle`, `--key` and `--status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeysConfig {
    /// How often the hotkey file is checked for changes.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Channel directory cache lifetime.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            network: default_network(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            bind_address: default_bind_address(),
            port: default_control_port(),
        }
    }
}

impl Default for HotkeysConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.rockradio.com".to_string()
}

fn default_network() -> String {
    "rockradio".to_string()
}

fn default_control_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    platform::DEFAULT_CONTROL_PORT
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_max_age_days() -> u64 {
    7
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read `path`, writing the defaults there first when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn control_address(&self) -> String {
        format!("{}:{}", self.control.bind_address, self.control.port)
    }

    /// Cache lifetime in seconds.
    pub fn cache_max_age_secs(&self) -> u64 {
        self.cache.max_age_days * 24 * 3600
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.control.enabled);
        assert_eq!(config.control.port, 9877);
        assert_eq!(config.control_address(), "127.0.0.1:9877");
        assert_eq!(config.station.network, "rockradio");
        assert!(config.station.base_url.starts_with("https://"));
        assert_eq!(config.cache_max_age_secs(), 7 * 24 * 3600);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.hotkeys.poll_interval_secs, 2);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[control]\nport = 4000\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.control.port, 4000);
        assert_eq!(config.control.bind_address, "127.0.0.1");
        assert_eq!(config.cache.max_age_days, 7);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[control\nport = ").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
