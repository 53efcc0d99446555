//! Application entry point for the `hydrofusion-sim` engine.
//!
//! This binary orchestrates the full startup sequence for the facility
//! simulator, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite store through the persistence gateway
//! - Creating the database schema if it does not exist
//! - Spawning one unit per (source, sensor type) plus the production unit
//! - Waiting for Ctrl-C and shutting the units down cleanly
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – SQLite connection string
//! - `SIM_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `SIM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`hydrofusion_sim::config`] for the facility layout variables.
use std::{env, sync::Arc};

use anyhow::Result;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use hydrofusion_sim::{config, engine::Simulation, schema, PersistenceGateway};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    tracing::info!("==========================================");
    tracing::info!("  Starting the HydroFusion simulator");
    tracing::info!("==========================================");

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let catalog = Arc::new(cfg.load_catalog()?);

    tracing::info!("Opening store: {}", cfg.db_url);

    let gateway = PersistenceGateway::connect(&cfg.db_url, cfg.db_pool_max)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store '{}': {}", cfg.db_url, e))?;

    // Schema must exist before any unit's first write
    schema::create_schema(gateway.pool())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize schema: {}", e))?;

    tracing::info!("Store ready");

    let simulation = Simulation::from_config(&cfg, &catalog);
    let handle = simulation.start(Arc::new(gateway), catalog);

    tracing::info!(
        "Simulation running with {} units. Press Ctrl+C to stop.",
        handle.unit_count()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    handle.shutdown().await;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SIM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: no span events (units live for the whole run)
/// - Log level controlled by the `SIM_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("SIM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::NONE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SIM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SIM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
