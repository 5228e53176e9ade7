//! Configuration management for the alert relay.
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to load configuration from an `alert-relay.toml` file and merge it
//! with environment variables and command-line arguments.

use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// The logging level for the application.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Global per-alert cap on delivery retries. Required.
    pub max_retry_count: u32,
    /// Seconds before the destination snapshot is considered stale.
    #[serde(default = "defaults::outputs_refresh_interval_seconds")]
    pub outputs_refresh_interval_seconds: u64,
    /// Retry delay jitter window. Required.
    pub retry: RetryDelayConfig,
    /// Dispatcher concurrency and deadlines.
    #[serde(default)]
    pub dispatch: DispatchTuning,
    /// Inbound batching behavior.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Endpoint of the external destination directory.
    pub directory: EndpointConfig,
    /// Endpoint of the external alert store.
    pub store: EndpointConfig,
}

/// Jitter window for retry re-enqueue delays.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryDelayConfig {
    pub min_delay_seconds: u64,
    pub max_delay_seconds: u64,
}

/// Dispatcher concurrency and deadline settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchTuning {
    /// Upper bound on concurrently running delivery tasks.
    #[serde(default = "defaults::max_in_flight")]
    pub max_in_flight: usize,
    /// Per-adapter-call timeout in seconds.
    #[serde(default = "defaults::delivery_timeout_seconds")]
    pub delivery_timeout_seconds: u64,
    /// Deadline in seconds for one whole dispatch pass.
    #[serde(default = "defaults::batch_deadline_seconds")]
    pub batch_deadline_seconds: u64,
}

impl Default for DispatchTuning {
    fn default() -> Self {
        Self {
            max_in_flight: defaults::max_in_flight(),
            delivery_timeout_seconds: defaults::delivery_timeout_seconds(),
            batch_deadline_seconds: defaults::batch_deadline_seconds(),
        }
    }
}

/// How inbound queue messages are grouped into dispatch passes.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BatchConfig {
    /// Dispatch as soon as this many messages are waiting.
    #[serde(default = "defaults::batch_size")]
    pub size: usize,
    /// Dispatch whatever is waiting after this many seconds.
    #[serde(default = "defaults::batch_flush_seconds")]
    pub flush_seconds: u64,
    /// Capacity of the inbound message channel.
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: defaults::batch_size(),
            flush_seconds: defaults::batch_flush_seconds(),
            queue_capacity: defaults::queue_capacity(),
        }
    }
}

/// A single upstream HTTP endpoint.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EndpointConfig {
    pub endpoint: String,
}

mod defaults {
    pub fn log_level() -> String {
        "info".to_string()
    }

    pub fn outputs_refresh_interval_seconds() -> u64 {
        300
    }

    pub fn max_in_flight() -> usize {
        num_cpus::get() * 4
    }

    pub fn delivery_timeout_seconds() -> u64 {
        30
    }

    pub fn batch_deadline_seconds() -> u64 {
        120
    }

    pub fn batch_size() -> usize {
        10
    }

    pub fn batch_flush_seconds() -> u64 {
        5
    }

    pub fn queue_capacity() -> usize {
        1024
    }
}

impl Config {
    /// Loads the application configuration by layering sources: file,
    /// environment (`ALERT_RELAY_` prefix, `__` as section separator), and
    /// command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("alert-relay.toml"));
        }
        let config: Config = figment
            .merge(Env::prefixed("ALERT_RELAY_").split("__"))
            .merge(cli.clone())
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants that serde alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.retry.min_delay_seconds >= self.retry.max_delay_seconds {
            bail!(
                "retry.min_delay_seconds ({}) must be less than retry.max_delay_seconds ({})",
                self.retry.min_delay_seconds,
                self.retry.max_delay_seconds
            );
        }
        if self.dispatch.max_in_flight == 0 {
            bail!("dispatch.max_in_flight must be at least 1");
        }
        if self.batch.size == 0 {
            bail!("batch.size must be at least 1");
        }
        Ok(())
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            max_retry_count: 10,
            outputs_refresh_interval_seconds: defaults::outputs_refresh_interval_seconds(),
            retry: RetryDelayConfig {
                min_delay_seconds: 10,
                max_delay_seconds: 30,
            },
            dispatch: DispatchTuning::default(),
            batch: BatchConfig::default(),
            directory: EndpointConfig {
                endpoint: "http://localhost:8081/outputs".to_string(),
            },
            store: EndpointConfig {
                endpoint: "http://localhost:8082".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use std::io::Write;

    fn cli_with_config(path: &std::path::Path) -> Cli {
        Cli::parse_from(["alert-relay", "--config", path.to_str().unwrap()])
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
        max_retry_count = 5

        [retry]
        min_delay_seconds = 10
        max_delay_seconds = 30

        [directory]
        endpoint = "http://directory.internal/outputs"

        [store]
        endpoint = "http://alerts.internal"
    "#;

    #[test]
    #[serial]
    fn minimal_file_loads_with_defaults() {
        let file = write_config(MINIMAL);
        let config = Config::load(&cli_with_config(file.path())).unwrap();

        assert_eq!(config.max_retry_count, 5);
        assert_eq!(config.outputs_refresh_interval_seconds, 300);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.batch.size, 10);
    }

    #[test]
    #[serial]
    fn missing_required_fields_fail_loudly() {
        let file = write_config("log_level = \"debug\"");
        assert!(Config::load(&cli_with_config(file.path())).is_err());
    }

    #[test]
    #[serial]
    fn inverted_delay_window_is_rejected() {
        let file = write_config(&MINIMAL.replace("max_delay_seconds = 30", "max_delay_seconds = 5"));
        let err = Config::load(&cli_with_config(file.path())).unwrap_err();
        assert!(err.to_string().contains("min_delay_seconds"));
    }

    #[test]
    #[serial]
    fn environment_overrides_the_file() {
        let file = write_config(MINIMAL);
        std::env::set_var("ALERT_RELAY_MAX_RETRY_COUNT", "7");
        std::env::set_var("ALERT_RELAY_RETRY__MIN_DELAY_SECONDS", "1");
        let config = Config::load(&cli_with_config(file.path()));
        std::env::remove_var("ALERT_RELAY_MAX_RETRY_COUNT");
        std::env::remove_var("ALERT_RELAY_RETRY__MIN_DELAY_SECONDS");

        let config = config.unwrap();
        assert_eq!(config.max_retry_count, 7);
        assert_eq!(config.retry.min_delay_seconds, 1);
    }

    #[test]
    #[serial]
    fn cli_flags_override_everything() {
        let file = write_config(MINIMAL);
        let cli = Cli::parse_from([
            "alert-relay",
            "--config",
            file.path().to_str().unwrap(),
            "--max-retry-count",
            "2",
            "--refresh-interval",
            "60",
        ]);
        let config = Config::load(&cli).unwrap();

        assert_eq!(config.max_retry_count, 2);
        assert_eq!(config.outputs_refresh_interval_seconds, 60);
    }

    #[test]
    fn default_config_passes_validation() {
        Config::default().validate().unwrap();
    }
}
