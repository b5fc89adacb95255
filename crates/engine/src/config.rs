use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::DEFAULT_COMMAND_CAPACITY;

pub const CONFIG_ENV_VAR: &str = "STELLAR_CONFIG";

/// Wall-clock nanoseconds per simulated second at the slowest speed step.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to read galaxy config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse galaxy config at {path}: {message}")]
    Parse { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GalaxyConfig {
    /// Worker pool size; 0 picks the available parallelism.
    pub worker_threads: usize,
    /// Wall-clock nanoseconds per simulated second. Negative starts paused.
    pub initial_speed_nanos: i64,
    pub min_tick_seconds: u32,
    pub max_tick_seconds: u32,
    /// Speeds below this value grow the tick size instead of ticking faster.
    pub tick_size_reference_nanos: u64,
    pub backlog_ticks: u32,
    pub paused_poll_interval_ms: u64,
    pub metrics_log_interval_ms: u64,
    pub command_queue_capacity: usize,
}

impl Default for GalaxyConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            initial_speed_nanos: NANOS_PER_SECOND,
            min_tick_seconds: 1,
            max_tick_seconds: 60,
            tick_size_reference_nanos: 1_000_000,
            backlog_ticks: 10,
            paused_poll_interval_ms: 1000,
            metrics_log_interval_ms: 1000,
            command_queue_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl GalaxyConfig {
    /// Reads the file named by `STELLAR_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(env::VarError::NotPresent) => Ok(Self::default()),
            Err(source) => Err(ConfigError::EnvVar {
                var: CONFIG_ENV_VAR,
                source,
            }),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        match serde_path_to_error::deserialize::<_, GalaxyConfig>(&mut deserializer) {
            Ok(config) => Ok(config.normalized()),
            Err(error) => {
                let path = error.path().to_string();
                let message = error.into_inner().to_string();
                Err(ConfigError::Parse { path, message })
            }
        }
    }

    /// Clamps values the scheduler cannot work with back into range.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.min_tick_seconds = self.min_tick_seconds.max(1);
        self.max_tick_seconds = self.max_tick_seconds.max(self.min_tick_seconds);
        if self.tick_size_reference_nanos == 0 {
            self.tick_size_reference_nanos = defaults.tick_size_reference_nanos;
        }
        if self.backlog_ticks == 0 {
            self.backlog_ticks = defaults.backlog_ticks;
        }
        if self.paused_poll_interval_ms == 0 {
            self.paused_poll_interval_ms = defaults.paused_poll_interval_ms;
        }
        if self.metrics_log_interval_ms == 0 {
            self.metrics_log_interval_ms = defaults.metrics_log_interval_ms;
        }
        if self.command_queue_capacity == 0 {
            self.command_queue_capacity = defaults.command_queue_capacity;
        }
        if self.initial_speed_nanos == 0 {
            self.initial_speed_nanos = defaults.initial_speed_nanos;
        }
        self
    }

    pub fn paused_poll_interval(&self) -> Duration {
        Duration::from_millis(self.paused_poll_interval_ms)
    }

    pub fn metrics_log_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_log_interval_ms)
    }

    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = GalaxyConfig::parse(r#"{ "worker_threads": 3 }"#).expect("parse");
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.max_tick_seconds, 60);
        assert_eq!(config.backlog_ticks, 10);
        assert_eq!(config.initial_speed_nanos, NANOS_PER_SECOND);
    }

    #[test]
    fn parse_error_reports_field_path() {
        let error = GalaxyConfig::parse(r#"{ "backlog_ticks": "many" }"#).expect_err("bad type");
        match error {
            ConfigError::Parse { path, .. } => assert_eq!(path, "backlog_ticks"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = GalaxyConfig::parse(r#"{ "warp_factor": 9 }"#).expect_err("unknown field");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn normalization_repairs_degenerate_bounds() {
        let config = GalaxyConfig {
            min_tick_seconds: 0,
            max_tick_seconds: 0,
            backlog_ticks: 0,
            tick_size_reference_nanos: 0,
            ..GalaxyConfig::default()
        }
        .normalized();
        assert_eq!(config.min_tick_seconds, 1);
        assert_eq!(config.max_tick_seconds, 1);
        assert_eq!(config.backlog_ticks, 10);
        assert_eq!(config.tick_size_reference_nanos, 1_000_000);
    }

    #[test]
    fn load_reads_json_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("galaxy.json");
        fs::write(&path, r#"{ "initial_speed_nanos": -250000000 }"#).expect("write config");

        let config = GalaxyConfig::load(&path).expect("load");
        assert_eq!(config.initial_speed_nanos, -250_000_000);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = TempDir::new().expect("temp dir");
        let error = GalaxyConfig::load(&dir.path().join("absent.json")).expect_err("missing");
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
