//! Client configuration.
//!
//! Values come from three layers, highest priority first:
//! 1. YAML file values (`ClientConfig::from_file`)
//! 2. Environment variables, including those loaded from a `.env` file
//! 3. Built-in defaults
//!
//! # Example
//! ```rust,no_run
//! use nls_sdk::config::ClientConfig;
//!
//! # fn main() -> Result<(), nls_sdk::NlsError> {
//! let config = ClientConfig::from_env()?;
//! println!("workers: {}", config.worker_threads);
//! # Ok(())
//! # }
//! ```

mod yaml;

pub use yaml::YamlConfig;

use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{NlsError, NlsResult};

// =============================================================================
// Constants
// =============================================================================

/// Upper bound for how long a pre-connected channel may sit idle.
pub const MAX_POOL_IDLE_TIMEOUT_MS: u64 = 23_000;

/// Upper bound for a single pre-connect attempt.
pub const MAX_POOL_REQUEST_TIMEOUT_MS: u64 = 8_000;

/// Default bound on queued, not yet transmitted audio (10 s of 16 kHz 16-bit mono).
pub const DEFAULT_AUDIO_BUFFER_LIMIT: usize = 320_000;

// =============================================================================
// Address family
// =============================================================================

/// Address family used when resolving the service host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AddressFamily {
    #[default]
    #[serde(rename = "AF_INET")]
    Inet,
    #[serde(rename = "AF_INET6")]
    Inet6,
    #[serde(rename = "AF_UNSPEC")]
    Unspec,
}

impl AddressFamily {
    /// Whether `ip` may be used under this family.
    pub fn admits(&self, ip: &IpAddr) -> bool {
        match self {
            AddressFamily::Inet => ip.is_ipv4(),
            AddressFamily::Inet6 => ip.is_ipv6(),
            AddressFamily::Unspec => true,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Inet => write!(f, "AF_INET"),
            AddressFamily::Inet6 => write!(f, "AF_INET6"),
            AddressFamily::Unspec => write!(f, "AF_UNSPEC"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = NlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AF_INET" | "INET" | "IPV4" => Ok(AddressFamily::Inet),
            "AF_INET6" | "INET6" | "IPV6" => Ok(AddressFamily::Inet6),
            "AF_UNSPEC" | "UNSPEC" => Ok(AddressFamily::Unspec),
            other => Err(NlsError::config(format!(
                "unsupported address family '{other}'"
            ))),
        }
    }
}

// =============================================================================
// Pool and log settings
// =============================================================================

/// Settings for the pre-connected channel pool. `max_count == 0` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_count: usize,
    pub idle_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_count: 0,
            idle_timeout_ms: 15_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    /// Build a pool config, capping both timeouts at their maxima.
    pub fn new(max_count: usize, idle_timeout_ms: u64, request_timeout_ms: u64) -> Self {
        Self {
            max_count,
            idle_timeout_ms: idle_timeout_ms.min(MAX_POOL_IDLE_TIMEOUT_MS),
            request_timeout_ms: request_timeout_ms.min(MAX_POOL_REQUEST_TIMEOUT_MS),
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_count > 0
    }
}

/// Logging settings consumed by [`crate::logging::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    /// Write to this file instead of stderr.
    pub file: Option<String>,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            ansi: true,
        }
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Process-wide settings owned by an [`crate::NlsClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Worker threads driving every connection.
    pub worker_threads: usize,
    /// Blocking budget for `start()`/`stop()`; 0 selects async mode.
    pub sync_call_timeout_ms: u64,
    pub address_family: AddressFamily,
    /// Connect to this IP instead of resolving the URL host.
    pub direct_host: Option<IpAddr>,
    pub connect_timeout_ms: u64,
    pub connect_retry_count: u32,
    /// Maximum silence from the server before the task is failed.
    pub recv_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub audio_buffer_limit_bytes: usize,
    pub pool: PoolConfig,
    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            sync_call_timeout_ms: 0,
            address_family: AddressFamily::Inet,
            direct_host: None,
            connect_timeout_ms: 5_000,
            connect_retry_count: 4,
            recv_timeout_ms: 12_000,
            send_timeout_ms: 3_000,
            audio_buffer_limit_bytes: DEFAULT_AUDIO_BUFFER_LIMIT,
            pool: PoolConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present;
    /// real environment variables take precedence over it.
    pub fn from_env() -> NlsResult<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file layered over the environment.
    pub fn from_file(path: impl AsRef<Path>) -> NlsResult<Self> {
        let _ = dotenvy::dotenv();
        let yaml_config = YamlConfig::from_file(path.as_ref())?;

        let mut config = Self::default();
        config.apply_env()?;
        yaml_config.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints and cap pool timeouts.
    pub fn validate(&mut self) -> NlsResult<()> {
        if self.worker_threads == 0 {
            return Err(NlsError::config("worker_threads must be at least 1"));
        }
        if self.connect_retry_count == 0 {
            return Err(NlsError::config("connect_retry_count must be at least 1"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(NlsError::config("connect_timeout_ms must be positive"));
        }
        if let Some(ip) = self
            .direct_host
            .filter(|ip| !self.address_family.admits(ip))
        {
            return Err(NlsError::config(format!(
                "direct host {ip} does not match address family {}",
                self.address_family
            )));
        }
        self.pool = PoolConfig::new(
            self.pool.max_count,
            self.pool.idle_timeout_ms,
            self.pool.request_timeout_ms,
        );
        Ok(())
    }

    pub fn sync_call_timeout(&self) -> Option<Duration> {
        (self.sync_call_timeout_ms > 0).then(|| Duration::from_millis(self.sync_call_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    fn apply_env(&mut self) -> NlsResult<()> {
        if let Some(v) = env_parse::<usize>("NLS_WORKER_THREADS")? {
            self.worker_threads = v;
        }
        if let Some(v) = env_parse::<u64>("NLS_SYNC_CALL_TIMEOUT_MS")? {
            self.sync_call_timeout_ms = v;
        }
        if let Some(v) = env_parse::<AddressFamily>("NLS_ADDR_FAMILY")? {
            self.address_family = v;
        }
        if let Some(v) = env_parse::<IpAddr>("NLS_DIRECT_HOST")? {
            self.direct_host = Some(v);
        }
        if let Some(v) = env_parse::<u64>("NLS_CONNECT_TIMEOUT_MS")? {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u32>("NLS_CONNECT_RETRY_COUNT")? {
            self.connect_retry_count = v;
        }
        if let Some(v) = env_parse::<u64>("NLS_RECV_TIMEOUT_MS")? {
            self.recv_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("NLS_SEND_TIMEOUT_MS")? {
            self.send_timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("NLS_AUDIO_BUFFER_LIMIT")? {
            self.audio_buffer_limit_bytes = v;
        }
        if let Some(v) = env_parse::<usize>("NLS_POOL_MAX")? {
            self.pool.max_count = v;
        }
        if let Some(v) = env_parse::<u64>("NLS_POOL_IDLE_TIMEOUT_MS")? {
            self.pool.idle_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("NLS_POOL_REQUEST_TIMEOUT_MS")? {
            self.pool.request_timeout_ms = v;
        }
        if let Ok(level) = std::env::var("NLS_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(file) = std::env::var("NLS_LOG_FILE") {
            self.log.file = Some(file);
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> NlsResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| NlsError::config(format!("invalid {key}='{raw}': {e}"))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clear_env() {
        for key in [
            "NLS_WORKER_THREADS",
            "NLS_SYNC_CALL_TIMEOUT_MS",
            "NLS_ADDR_FAMILY",
            "NLS_DIRECT_HOST",
            "NLS_CONNECT_RETRY_COUNT",
            "NLS_POOL_MAX",
            "NLS_POOL_IDLE_TIMEOUT_MS",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.worker_threads, 1);
        assert!(config.sync_call_timeout().is_none());
        assert_eq!(config.connect_retry_count, 4);
        assert_eq!(config.recv_timeout(), Duration::from_secs(12));
        assert!(!config.pool.enabled());
    }

    #[test]
    fn test_address_family_parse() {
        assert_eq!(
            "AF_INET6".parse::<AddressFamily>().unwrap(),
            AddressFamily::Inet6
        );
        assert_eq!(
            "af_unspec".parse::<AddressFamily>().unwrap(),
            AddressFamily::Unspec
        );
        assert!("AF_UNIX".parse::<AddressFamily>().is_err());
    }

    #[test]
    fn test_pool_timeouts_are_capped() {
        let pool = PoolConfig::new(4, 60_000, 60_000);
        assert_eq!(pool.idle_timeout_ms, MAX_POOL_IDLE_TIMEOUT_MS);
        assert_eq!(pool.request_timeout_ms, MAX_POOL_REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn test_validate_rejects_mismatched_direct_host() {
        let mut config = ClientConfig {
            direct_host: Some("::1".parse().unwrap()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.address_family = AddressFamily::Unspec;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        unsafe {
            std::env::set_var("NLS_WORKER_THREADS", "3");
            std::env::set_var("NLS_SYNC_CALL_TIMEOUT_MS", "2500");
            std::env::set_var("NLS_DIRECT_HOST", "127.0.0.1");
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.sync_call_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.direct_host, Some("127.0.0.1".parse().unwrap()));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        clear_env();
        unsafe { std::env::set_var("NLS_CONNECT_RETRY_COUNT", "many") };
        let err = ClientConfig::from_env().unwrap_err();
        assert!(matches!(err, NlsError::Configuration(_)));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_file_overrides_env() {
        clear_env();
        unsafe { std::env::set_var("NLS_WORKER_THREADS", "2") };
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
worker_threads: 4
address_family: AF_UNSPEC
preconnected_pool:
  max_count: 2
  idle_timeout_ms: 90000
log:
  level: debug
"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.address_family, AddressFamily::Unspec);
        assert_eq!(config.pool.max_count, 2);
        assert_eq!(config.pool.idle_timeout_ms, MAX_POOL_IDLE_TIMEOUT_MS);
        assert_eq!(config.log.level, "debug");
        clear_env();
    }
}
