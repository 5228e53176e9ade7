//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using
//! the `clap` crate. These arguments are parsed at startup and then merged
//! with the configuration from the `alert-relay.toml` file and environment
//! variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Routes security alerts to their configured notification destinations.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Global per-alert cap on delivery retries.
    #[arg(long, value_name = "COUNT")]
    pub max_retry_count: Option<u32>,

    /// Seconds before the destination snapshot is considered stale.
    #[arg(long, value_name = "SECONDS")]
    pub refresh_interval: Option<u64>,

    /// Upper bound on concurrently running delivery tasks.
    #[arg(long, value_name = "TASKS")]
    pub max_in_flight: Option<usize>,

    /// The logging level (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(count) = self.max_retry_count {
            dict.insert("max_retry_count".into(), Value::from(count));
        }

        if let Some(seconds) = self.refresh_interval {
            dict.insert(
                "outputs_refresh_interval_seconds".into(),
                Value::from(seconds),
            );
        }

        if let Some(tasks) = self.max_in_flight {
            let mut dispatch = Dict::new();
            dispatch.insert("max_in_flight".into(), Value::from(tasks as u64));
            dict.insert("dispatch".into(), Value::Dict(Tag::Default, dispatch));
        }

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
