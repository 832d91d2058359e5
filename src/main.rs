//! Listing Sync - Multi-Platform Resale Synchronization
//!
//! Reconciles product listings across marketplaces and records sales.
//! Runs continuously with periodic sold-detection and re-sync sweeps.

use clap::Parser;
use listing_sync::config::Settings;
use listing_sync::platforms::adapters_from_settings;
use listing_sync::sales::SalesRecorder;
use listing_sync::sheets::{AccountingSink, SheetsClient};
use listing_sync::{init_schema, SyncOrchestrator};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::interval;

/// Multi-platform resale sync server
#[derive(Parser, Debug)]
#[command(name = "listing_sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value_t = default_db_path())]
    database: String,

    /// Run one sync pass and exit (default: run continuously)
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Minutes between sync passes; overrides SYNC_INTERVAL_MINUTES
    #[arg(long)]
    interval_minutes: Option<u64>,

    /// Enable the web API on specified port (default: disabled)
    #[arg(long)]
    web_port: Option<u16>,
}

/// Returns the default database path: ~/.local/share/listing_sync/listings.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("listing_sync")
        .join("listings.db")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = Settings::from_env();
    let db_path = PathBuf::from(&args.database);

    log::info!("Starting listing_sync...");
    log::info!("Database path: {}", db_path.display());

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    // Open database connection
    let conn = match Connection::open(&db_path) {
        Ok(conn) => {
            log::info!("Opened database: {}", db_path.display());
            conn
        }
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database schema
    if let Err(e) = init_schema(&conn) {
        log::error!("Failed to initialize database schema: {}", e);
        std::process::exit(1);
    }

    // Wrap connection in Arc<Mutex> for thread-safe sharing
    let db = Arc::new(Mutex::new(conn));

    // Build the adapter set and the accounting sink from configuration
    let adapters = adapters_from_settings(&settings);
    let sink: Option<Arc<dyn AccountingSink>> = if settings.sheets.is_configured() {
        Some(Arc::new(SheetsClient::new(
            &settings.sheets,
            settings.request_timeout_secs,
        )))
    } else {
        None
    };
    let recorder = SalesRecorder::new(Arc::clone(&db), sink);
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::clone(&db), adapters, recorder));

    // Spawn web server if --web-port specified
    if let Some(port) = args.web_port {
        let web_db = Arc::clone(&db);
        let web_orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if let Err(e) = listing_sync::web::serve(web_db, web_orchestrator, port).await {
                log::error!("Web server error: {}", e);
            }
        });
    }

    let interval_minutes = args
        .interval_minutes
        .unwrap_or(settings.sync_interval_minutes);

    if args.once {
        // Run once and exit
        run_sync(&orchestrator).await;
    } else {
        // Run continuously with interval checks
        log::info!(
            "Running in daemon mode, syncing every {} minute(s)",
            interval_minutes
        );
        run_daemon(&orchestrator, interval_minutes).await;
    }
}

/// Run the sync daemon - periodic sold detection, re-sync and retry sweep
async fn run_daemon(orchestrator: &Arc<SyncOrchestrator>, interval_minutes: u64) {
    let mut ticker = interval(Duration::from_secs(interval_minutes * 60));

    // Run immediately on startup
    run_sync(orchestrator).await;

    loop {
        ticker.tick().await;
        log::info!("Scheduled sync triggered");
        run_sync(orchestrator).await;
    }
}

/// Run a single sync pass
async fn run_sync(orchestrator: &Arc<SyncOrchestrator>) {
    // Detect sales and close out sold products everywhere
    match orchestrator.check_sold().await {
        Ok(report) => {
            log::info!(
                "Sold check: {} listings checked, {} sold, {} errors",
                report.checked,
                report.sold_items.len(),
                report.errors.len()
            );
        }
        Err(e) => {
            log::error!("Sold check failed: {}", e);
            return;
        }
    }

    // Re-push errored and stale listings
    match orchestrator.sync_all().await {
        Ok(report) => {
            log::info!(
                "Re-sync: {}/{} listings synced ({} failed)",
                report.synced,
                report.attempted,
                report.failed
            );
        }
        Err(e) => {
            log::error!("Re-sync failed: {}", e);
            return;
        }
    }

    // Forward any sales accounting missed
    match orchestrator.recorder().retry_unsynced().await {
        Ok(report) if report.attempted > 0 => {
            log::info!(
                "Accounting sweep: {}/{} sales forwarded",
                report.forwarded,
                report.attempted
            );
        }
        Ok(_) => {}
        Err(e) => {
            log::error!("Accounting sweep failed: {}", e);
        }
    }

    log::info!("Sync pass completed.");
}
