//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is left
//! to the embedding application or to [`init`]. Initialising twice is a
//! no-op, so a host that already installed its own subscriber keeps it.

use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;

use crate::config::LogConfig;
use crate::errors::{NlsError, NlsResult};

/// Install a global `fmt` subscriber described by `config`.
///
/// Returns `Ok(false)` when a global subscriber was already set.
pub fn init(config: &LogConfig) -> NlsResult<bool> {
    let level = LevelFilter::from_str(&config.level)
        .map_err(|e| NlsError::config(format!("invalid log level '{}': {e}", config.level)))?;

    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| NlsError::config(format!("cannot open log file {path}: {e}")))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok()
        }
        None => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(config.ansi)
            .with_thread_names(true)
            .try_init()
            .is_ok(),
    };
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_level() {
        let config = LogConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(init(&config), Err(NlsError::Configuration(_))));
    }

    #[test]
    fn test_file_sink_and_repeat_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nls.log");
        let config = LogConfig {
            level: "debug".to_string(),
            file: Some(path.to_string_lossy().into_owned()),
            ansi: false,
        };
        let _ = init(&config).unwrap();
        assert!(path.exists());
        assert!(!init(&config).unwrap(), "second init must not replace the subscriber");
    }
}
