//! ambientwatch -- statistical monitoring of the local wireless environment.
//!
//! Periodic scans are reduced to aggregate observations, folded into a
//! baseline, and judged against it: anomaly findings, multi-window trends,
//! an environment fingerprint and an overall status with a confidence.

pub mod analysis;
pub mod api;
pub mod collect;
pub mod config;
pub mod detect;
pub mod error;
pub mod monitor;
pub mod observation;
pub mod report;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{Analyzer, BaselineStatus};
use crate::config::Config;
use crate::storage::Pool;

/// Rebuild an analyzer from the stored baseline and the trailing history.
pub fn restore_analyzer(config: &Config, pool: &Pool) -> Result<Analyzer> {
    let recent = storage::load_recent(pool, config.temporal.windows.largest())?;
    match storage::load_baseline(pool, storage::CURRENT_BASELINE)? {
        Some(mut model) => {
            model.reconfigure(config.baseline.clone());
            // Observations stored after the baseline was last saved.
            let missed = storage::load_after(pool, model.last_sequence_id().unwrap_or(0))?;
            for obs in &missed {
                model.offer(obs)?;
            }
            info!(
                samples = model.sample_count(),
                pending = model.pending(),
                caught_up = missed.len(),
                recent = recent.len(),
                "Restored baseline from storage"
            );
            Ok(Analyzer::restore(config, model, recent))
        }
        None => {
            let mut analyzer = Analyzer::new(config);
            if !recent.is_empty() {
                // Observations without a saved baseline: start from them.
                let all = storage::load_all(pool)?;
                let status = analyzer.rebuild(&all)?;
                info!(samples = status.sample_count, "Built baseline from stored observations");
            }
            Ok(analyzer)
        }
    }
}

/// Rebuild the baseline from every stored observation. The previous baseline
/// is kept under `backup_<last sequence id>`.
pub fn rebuild_baseline(config: &Config, pool: &Pool) -> Result<BaselineStatus> {
    let history = storage::load_all(pool)?;
    let mut analyzer = Analyzer::new(config);
    let status = analyzer
        .rebuild(&history)
        .context("no stored observations to rebuild from")?;

    if let Some(previous) = storage::load_baseline(pool, storage::CURRENT_BASELINE)? {
        let label = format!("backup_{}", previous.last_sequence_id().unwrap_or(0));
        storage::save_baseline(pool, &label, &previous)?;
        info!(%label, "Previous baseline backed up");
    }
    storage::save_baseline(pool, storage::CURRENT_BASELINE, analyzer.baseline())?;
    Ok(status)
}

/// Start the daemon: monitor loop in the background, HTTP API in front.
pub async fn serve(config: Config, bind: &str) -> Result<()> {
    let db_path = config.storage.db_path.clone();
    info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    let restored = {
        let pool = pool.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || restore_analyzer(&config, &pool)).await??
    };
    let analyzer = Arc::new(RwLock::new(restored));

    let collector = Arc::new(collect::IwScanCollector::new(&config.monitor));
    let monitor = monitor::Monitor::new(analyzer.clone(), collector, Some(pool.clone()));
    let state = api::state::AppState {
        analyzer,
        reports: monitor.subscribe(),
        pool: Some(pool),
    };

    let cancel = CancellationToken::new();
    let options = monitor::MonitorOptions {
        interval: Duration::from_secs(config.monitor.interval_secs),
        max_cycles: None,
    };
    let loop_handle = tokio::spawn(monitor::run_monitor_loop(monitor, options, cancel.clone()));

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", bind))?;
    let app = api::router(state);

    info!(%addr, "ambientwatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let cycles = loop_handle.await??;
    info!(cycles, "Shut down");
    Ok(())
}
