//! alert-relay - Security Alert Delivery Engine
//!
//! Reads JSON-serialized alerts (one per line) from stdin, resolves each to
//! its notification destinations and delivers them concurrently, retrying
//! transient failures with jittered delays.

use alert_relay::{app::App, cli::Cli, config::Config};
use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: file, environment, and CLI
    // args. Logging is not up yet, so config failures go to stderr.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        eprintln!("failed to load configuration: {err:#}");
        std::process::exit(1);
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("alert-relay starting up");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Max Retry Count: {}", config.max_retry_count);
    info!(
        "Retry Delay: {}-{}s",
        config.retry.min_delay_seconds, config.retry.max_delay_seconds
    );
    info!(
        "Destination Refresh Interval: {}s",
        config.outputs_refresh_interval_seconds
    );
    info!("Dispatch In-Flight Limit: {}", config.dispatch.max_in_flight);
    info!(
        "Delivery Timeout: {}s",
        config.dispatch.delivery_timeout_seconds
    );
    info!(
        "Batch: size {}, flush {}s",
        config.batch.size, config.batch.flush_seconds
    );
    info!("Destination Directory: {}", config.directory.endpoint);
    info!("Alert Store: {}", config.store.endpoint);
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (app, inbound_tx) = App::builder(config).build(shutdown_rx)?;
    let mut app_handle = tokio::spawn(app.run());

    // Feed the inbound channel from stdin, one JSON alert per line.
    let stdin_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if inbound_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed, no more inbound alerts");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read from stdin");
                    break;
                }
            }
        }
        // Dropping the sender lets in-flight retries drain before the app
        // sees the channel close.
        drop(inbound_tx);
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
            // Wait for the final flush before exiting.
            let _ = (&mut app_handle).await;
        }
        result = &mut app_handle => {
            match result {
                Ok(Ok(())) => info!("consumer loop finished"),
                Ok(Err(e)) => error!(error = %e, "consumer loop failed"),
                Err(e) => error!(error = %e, "consumer task panicked"),
            }
        }
    }

    stdin_handle.abort();
    info!("alert-relay shut down");
    Ok(())
}
