use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

use super::{AddressFamily, ClientConfig};
use crate::errors::{NlsError, NlsResult};

/// YAML configuration file layout
///
/// Every field is optional; unspecified fields keep the value coming from the
/// environment or the defaults.
///
/// # Example YAML structure
/// ```yaml
/// worker_threads: 2
/// sync_call_timeout_ms: 3000
/// address_family: AF_INET
/// direct_host: "106.15.83.44"
/// connect_timeout_ms: 5000
/// connect_retry_count: 4
/// recv_timeout_ms: 12000
/// audio_buffer_limit_bytes: 320000
///
/// preconnected_pool:
///   max_count: 4
///   idle_timeout_ms: 15000
///   request_timeout_ms: 5000
///
/// log:
///   level: info
///   file: "/var/log/nls/sdk.log"
///   ansi: false
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub worker_threads: Option<usize>,
    pub sync_call_timeout_ms: Option<u64>,
    pub address_family: Option<AddressFamily>,
    pub direct_host: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub connect_retry_count: Option<u32>,
    pub recv_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
    pub audio_buffer_limit_bytes: Option<usize>,
    pub preconnected_pool: Option<PoolYaml>,
    pub log: Option<LogYaml>,
}

/// Pre-connected pool section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PoolYaml {
    pub max_count: Option<usize>,
    pub idle_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

/// Logging section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LogYaml {
    pub level: Option<String>,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns a configuration error if the file cannot be read or the YAML is
    /// malformed.
    pub fn from_file(path: &Path) -> NlsResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NlsError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&contents)
            .map_err(|e| NlsError::config(format!("Failed to parse YAML config: {e}")))
    }

    /// Overlay the values present in this file onto `config`.
    pub fn apply(&self, config: &mut ClientConfig) -> NlsResult<()> {
        if let Some(v) = self.worker_threads {
            config.worker_threads = v;
        }
        if let Some(v) = self.sync_call_timeout_ms {
            config.sync_call_timeout_ms = v;
        }
        if let Some(v) = self.address_family {
            config.address_family = v;
        }
        if let Some(host) = &self.direct_host {
            let ip = host
                .parse::<IpAddr>()
                .map_err(|e| NlsError::config(format!("invalid direct_host '{host}': {e}")))?;
            config.direct_host = Some(ip);
        }
        if let Some(v) = self.connect_timeout_ms {
            config.connect_timeout_ms = v;
        }
        if let Some(v) = self.connect_retry_count {
            config.connect_retry_count = v;
        }
        if let Some(v) = self.recv_timeout_ms {
            config.recv_timeout_ms = v;
        }
        if let Some(v) = self.send_timeout_ms {
            config.send_timeout_ms = v;
        }
        if let Some(v) = self.audio_buffer_limit_bytes {
            config.audio_buffer_limit_bytes = v;
        }
        if let Some(pool) = &self.preconnected_pool {
            if let Some(v) = pool.max_count {
                config.pool.max_count = v;
            }
            if let Some(v) = pool.idle_timeout_ms {
                config.pool.idle_timeout_ms = v;
            }
            if let Some(v) = pool.request_timeout_ms {
                config.pool.request_timeout_ms = v;
            }
        }
        if let Some(log) = &self.log {
            if let Some(level) = &log.level {
                config.log.level = level.clone();
            }
            if let Some(file) = &log.file {
                config.log.file = Some(file.clone());
            }
            if let Some(ansi) = log.ansi {
                config.log.ansi = ansi;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
worker_threads: 2
direct_host: "10.0.0.8"
"#;
        let parsed: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let mut config = ClientConfig::default();
        parsed.apply(&mut config).unwrap();

        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.direct_host, Some("10.0.0.8".parse().unwrap()));
        assert_eq!(config.recv_timeout_ms, 12_000);
    }

    #[test]
    fn test_yaml_config_invalid_direct_host() {
        let parsed: YamlConfig = serde_yaml::from_str("direct_host: \"not-an-ip\"").unwrap();
        let mut config = ClientConfig::default();
        assert!(parsed.apply(&mut config).is_err());
    }

    #[test]
    fn test_yaml_config_missing_file() {
        let err = YamlConfig::from_file(Path::new("/nonexistent/nls.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
