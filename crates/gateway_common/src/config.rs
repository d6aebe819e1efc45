//! Configuration for gateway diagnostics.
//!
//! Config file: `~/.config/gateway-diag/config.toml` or
//! `/etc/gateway-diag/config.toml`. Every field has a default, so an empty
//! or partial file is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::diagnostics::RunMode;
use crate::error::{GatewayError, Result};

/// Environment variable overriding `gateway.url`
pub const URL_ENV: &str = "GATEWAY_URL";

/// Default gateway address on the LAN side
pub const DEFAULT_GATEWAY_URL: &str = "http://192.168.0.1";

/// The V1 REST path root
pub const DEFAULT_API_ROOT: &str = "/rest/v1";

/// Connection settings for the gateway REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Base URL, e.g. `http://192.168.0.1`
    pub url: String,
    /// Versioned API root appended to the URL
    pub api_root: String,
    /// Default per-call timeout
    pub request_timeout_ms: u64,
    /// Delay between retries of a GET answered with 503
    pub retry_delay_ms: u64,
    /// Number of 503 retries (0 disables)
    pub retry_count: u32,
    /// Environment variable holding the admin password
    pub password_env: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            api_root: DEFAULT_API_ROOT.to_string(),
            request_timeout_ms: 10_000,
            retry_delay_ms: 10_000,
            retry_count: 2,
            password_env: "GATEWAY_PASSWORD".to_string(),
        }
    }
}

impl GatewaySection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Full API base, e.g. `http://192.168.0.1/rest/v1`
    pub fn api_base(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.api_root.trim_matches('/')
        )
    }
}

/// Timing and threshold settings for the diagnostic run and job manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Deadline for each state-machine request
    pub request_timeout_ms: u64,
    /// Interval between job status polls (ping and traceroute)
    pub poll_interval_ms: u64,
    /// Deadline for the whole broadband ping probe
    pub ping_timeout_ms: u64,
    /// Ping target when IPv4 is used
    pub ipv4_ping_host: String,
    /// Ping target when IPv6 is provisioned and valid
    pub ipv6_ping_host: String,
    /// WAN interface the broadband ping is sent from
    pub ping_interface: String,
    /// More failed pings than this fails the check
    pub ping_failure_limit: u32,
    /// Total duration of the wired flip-flop test
    pub wired_test_duration_ms: u64,
    /// Interval between wired host count samples
    pub wired_poll_interval_ms: u64,
    /// More host count changes than this means an unstable link
    pub wired_reconnections_allowed: u32,
    /// Wired hosts below this link speed (Mb/s) are reported
    pub wired_min_speed_mbps: u32,
    /// WiFi clients below this RSSI (dBm) are reported
    pub rssi_threshold_dbm: i32,
    /// Headline wording of the final verdict
    pub mode: RunMode,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            poll_interval_ms: 2_000,
            ping_timeout_ms: 30_000,
            ipv4_ping_host: "www.google.com".to_string(),
            ipv6_ping_host: "ipv6.google.com".to_string(),
            ping_interface: "wan0".to_string(),
            ping_failure_limit: 2,
            wired_test_duration_ms: 30_000,
            wired_poll_interval_ms: 2_000,
            wired_reconnections_allowed: 3,
            wired_min_speed_mbps: 1000,
            rssi_threshold_dbm: -60,
            mode: RunMode::Standard,
        }
    }
}

impl DiagnosticsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn wired_test_duration(&self) -> Duration {
        Duration::from_millis(self.wired_test_duration_ms)
    }

    pub fn wired_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wired_poll_interval_ms)
    }
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl GatewayConfig {
    /// Get default user config path: ~/.config/gateway-diag/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gateway-diag").join("config.toml"))
    }

    /// Get system config path: /etc/gateway-diag/config.toml
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/gateway-diag/config.toml")
    }

    /// Load configuration.
    ///
    /// Priority:
    /// 1. Explicit path (must exist)
    /// 2. User config
    /// 3. System config
    /// 4. Defaults
    ///
    /// `GATEWAY_URL` overrides the gateway URL in every case.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => Self::load_default_locations()?,
        };

        if let Ok(url) = std::env::var(URL_ENV) {
            if !url.trim().is_empty() {
                config.gateway.url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn load_default_locations() -> Result<Self> {
        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                return Self::load_from(&user_path);
            }
        }

        let system_path = Self::system_config_path();
        if system_path.exists() {
            return Self::load_from(&system_path);
        }

        debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Load from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| GatewayError::io(path, e))?;
        let config: GatewayConfig = toml::from_str(&contents)?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GatewayError::io(parent, e))?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).map_err(|e| GatewayError::io(path, e))?;
        Ok(())
    }

    /// Reject settings that would make the engine spin or never finish
    pub fn validate(&self) -> Result<()> {
        let invalid = |details: &str| {
            Err(GatewayError::InvalidConfig {
                details: details.to_string(),
            })
        };

        if !self.gateway.url.starts_with("http://") && !self.gateway.url.starts_with("https://") {
            return invalid("gateway.url must start with http:// or https://");
        }
        if self.gateway.request_timeout_ms == 0 || self.diagnostics.request_timeout_ms == 0 {
            return invalid("request timeouts must be greater than zero");
        }
        if self.diagnostics.poll_interval_ms == 0 || self.diagnostics.wired_poll_interval_ms == 0 {
            return invalid("poll intervals must be greater than zero");
        }
        if self.diagnostics.wired_test_duration_ms < self.diagnostics.wired_poll_interval_ms {
            return invalid("wired_test_duration_ms must be at least one poll interval");
        }
        if self.diagnostics.ipv4_ping_host.is_empty() || self.diagnostics.ipv6_ping_host.is_empty() {
            return invalid("ping hosts must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.gateway.api_base(), "http://192.168.0.1/rest/v1");
        assert_eq!(config.diagnostics.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.diagnostics.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.diagnostics.rssi_threshold_dbm, -60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [gateway]
            url = "http://10.0.0.1/"

            [diagnostics]
            ping_failure_limit = 4
            mode = "troubleshoot"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.api_base(), "http://10.0.0.1/rest/v1");
        assert_eq!(config.gateway.retry_count, 2);
        assert_eq!(config.diagnostics.ping_failure_limit, 4);
        assert_eq!(config.diagnostics.mode, RunMode::Troubleshoot);
        assert_eq!(config.diagnostics.ping_interface, "wan0");
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = GatewayConfig::default();
        config.diagnostics.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.gateway.url = "192.168.0.1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = GatewayConfig::default();
        config.diagnostics.wired_reconnections_allowed = 5;
        config.save_to(&path).unwrap();

        let loaded = GatewayConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = GatewayConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.code(), "GW-3001");
    }
}
