//! triage-daemon: drains the capture queue in the background.
//!
//! Connects to PostgreSQL, applies migrations, starts the queue scheduler
//! and health-checks the classifier endpoint so that a restored connection
//! triggers an immediate sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use triage_core::{defaults, ClassifierClient};
use triage_db::{log_pool_metrics, Database, PoolConfig};
use triage_inference::OpenAIClassifier;
use triage_jobs::{NetworkMonitor, SchedulerBuilder, SchedulerConfig, SchedulerEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "triage_daemon=info,triage_jobs=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "triage_daemon=info,triage_jobs=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("triage-daemon.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        subsystem = "daemon",
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults::DATABASE_URL.to_string());
    let health_check_interval_secs: u64 = std::env::var("TRIAGE_HEALTH_CHECK_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(defaults::HEALTH_CHECK_INTERVAL_SECS);

    info!(subsystem = "daemon", "Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    log_pool_metrics(db.pool());

    info!(subsystem = "daemon", "Running database migrations...");
    db.migrate().await?;
    info!(subsystem = "daemon", "Database migrations complete");

    let classifier = Arc::new(OpenAIClassifier::from_env()?);
    if !classifier.is_configured() {
        warn!(
            subsystem = "daemon",
            "No classifier API key set (LLM_API_KEY); sweeps will be skipped"
        );
    }

    let Database {
        captures,
        preferences,
        entities,
        ..
    } = db;
    let scheduler = Arc::new(
        SchedulerBuilder::new(
            Arc::new(captures),
            Arc::new(entities),
            Arc::new(preferences),
            classifier.clone(),
        )
        .with_config(SchedulerConfig::from_env())
        .build(),
    );

    let monitor = Arc::new(NetworkMonitor::default());
    scheduler.attach_network(&monitor);

    let handle = scheduler.start();

    let mut events = handle.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::SweepCompleted { report }) => debug!(
                    subsystem = "daemon",
                    processed = report.processed(),
                    deferred = report.deferred,
                    "Sweep report"
                ),
                Ok(SchedulerEvent::CaptureFailed {
                    capture_id, error, ..
                }) => warn!(
                    subsystem = "daemon",
                    capture_id = %capture_id,
                    error = %error,
                    "Capture needs attention"
                ),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(subsystem = "daemon", skipped, "Event listener lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let check_client = classifier.clone();
    let check_monitor = monitor.clone();
    let health_check = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(health_check_interval_secs));
        loop {
            ticker.tick().await;
            let reachable = check_client.health_check().await.unwrap_or(false);
            check_monitor.report(reachable);
        }
    });

    info!(
        subsystem = "daemon",
        health_check_interval_secs,
        "triage-daemon running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!(subsystem = "daemon", "Shutting down...");
    health_check.abort();
    handle.shutdown().await?;
    handle.join().await?;
    info!(subsystem = "daemon", "Shutdown complete");

    Ok(())
}
