//! listing-reaper binary
//!
//! Ends aged listings once and prints the run summary to stdout. The last
//! stdout line is always `total deleted: <N>`.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use listing_reaper::domain::SyncError;
use listing_reaper::infrastructure::{
    ConfigManager, DatabaseConnection, SqliteListingRepository, StaticTokenProvider, TradingApiClient,
    init_logging_with_config,
};
use listing_reaper::sync_engine::{RunSummary, SyncEngine};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ Run aborted: {:#}", e);
            eprintln!("listing-reaper: {:#}", e);
            let _ = write_empty_summary(&mut std::io::stdout().lock());
            ExitCode::FAILURE
        }
    }
}

fn write_empty_summary<W: Write>(out: &mut W) -> std::io::Result<()> {
    let summary = RunSummary::empty(Uuid::new_v4(), Utc::now(), Duration::ZERO);
    summary.emit(out).inspect_err(|e| {
        eprintln!("listing-reaper: failed to write summary: {}", e);
    })
}

/// Writes the outcome of an engine run. Returns `true` only when the run
/// succeeded and its summary was written completely.
///
/// Once a real summary has been started nothing else is written, so a
/// half-written report never ends with a second summary line.
fn publish<W: Write>(outcome: Result<RunSummary, SyncError>, out: &mut W) -> bool {
    match outcome {
        Ok(summary) => match summary.emit(out) {
            Ok(()) => true,
            Err(e) => {
                error!("❌ Failed to write run summary: {}", e);
                eprintln!("listing-reaper: failed to write summary: {}", e);
                false
            }
        },
        Err(e) => {
            error!("❌ {}", e);
            let _ = write_empty_summary(out);
            false
        }
    }
}

async fn run() -> Result<ExitCode> {
    let manager = ConfigManager::new()?;
    manager.initialize_on_first_run().await?;
    let config = manager.load()?;
    init_logging_with_config(&config.logging)?;
    info!("🚀 listing-reaper {} starting (config: {:?})", env!("CARGO_PKG_VERSION"), manager.config_path());

    let db = DatabaseConnection::from_config(&config.database).await?;
    db.migrate().await.context("Failed to migrate listing table")?;
    let repository = Arc::new(SqliteListingRepository::new(db.pool().clone(), config.database.min_age_days));

    let tokens = Arc::new(StaticTokenProvider::new(config.trading.tokens.clone()));
    let client = Arc::new(TradingApiClient::new(
        config.trading.clone(),
        tokens,
        config.engine.rate_limit_codes.clone(),
    )?);

    let engine = SyncEngine::new(config.engine.clone(), repository.clone(), client, repository)?;

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing in-flight batches");
            cancel.cancel();
        }
    });

    let outcome = engine.run().await;
    if publish(outcome, &mut std::io::stdout().lock()) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
