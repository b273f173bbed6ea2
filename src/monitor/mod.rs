//! The continuous monitoring loop: collect, analyze, persist, publish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analysis::{Analyzer, CycleReport};
use crate::collect::Collector;
use crate::error::AnalysisError;
use crate::storage::{self, Pool};

/// Latest published report; `None` until the first cycle completes.
pub type ReportSender = watch::Sender<Option<Arc<CycleReport>>>;
pub type ReportReceiver = watch::Receiver<Option<Arc<CycleReport>>>;

pub type SharedAnalyzer = Arc<RwLock<Analyzer>>;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub interval: Duration,
    /// Stop after this many cycles; run until cancelled when `None`.
    pub max_cycles: Option<u64>,
}

/// Everything one cycle needs. Cheap to clone.
#[derive(Clone)]
pub struct Monitor {
    analyzer: SharedAnalyzer,
    collector: Arc<dyn Collector>,
    pool: Option<Pool>,
    reports: Arc<ReportSender>,
}

impl Monitor {
    pub fn new(
        analyzer: SharedAnalyzer,
        collector: Arc<dyn Collector>,
        pool: Option<Pool>,
    ) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            analyzer,
            collector,
            pool,
            reports: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> ReportReceiver {
        self.reports.subscribe()
    }

    pub fn analyzer(&self) -> SharedAnalyzer {
        self.analyzer.clone()
    }

    /// First sequence id to hand out, past both storage and the analyzer.
    pub async fn next_sequence_id(&self) -> Result<u64> {
        let from_analyzer = self
            .analyzer
            .read()
            .await
            .last_sequence_id()
            .map_or(1, |s| s + 1);
        let from_storage = match &self.pool {
            Some(pool) => {
                let pool = pool.clone();
                tokio::task::spawn_blocking(move || storage::next_sequence_id(&pool)).await??
            }
            None => 1,
        };
        Ok(from_analyzer.max(from_storage))
    }

    /// Collect one observation and run it through the analyzer. With a
    /// database attached, the observation, report and baseline are stored in
    /// one transaction before the analyzer keeps the new state; a failed
    /// write leaves the analyzer as it was. The report is then published.
    pub async fn run_cycle(&self, sequence_id: u64) -> Result<Arc<CycleReport>> {
        let obs = self
            .collector
            .collect(sequence_id)
            .await
            .with_context(|| format!("{} collector failed", self.collector.name()))?;

        let mut analyzer = self.analyzer.write().await;
        let mut next = analyzer.clone();
        let report = next.process(obs.clone())?;

        if let Some(pool) = &self.pool {
            let pool = pool.clone();
            let report = report.clone();
            let model = next.baseline().clone();
            tokio::task::spawn_blocking(move || storage::record_cycle(&pool, &obs, &report, &model))
                .await??;
        }
        *analyzer = next;
        drop(analyzer);

        let report = Arc::new(report);
        self.reports.send_replace(Some(report.clone()));
        Ok(report)
    }
}

/// Run cycles on a fixed interval until cancelled or `max_cycles` is reached.
/// Failed cycles are logged and do not stop the loop. Returns the number of
/// cycles that produced a report.
pub async fn run_monitor_loop(
    monitor: Monitor,
    options: MonitorOptions,
    cancel: CancellationToken,
) -> Result<u64> {
    info!(
        collector = monitor.collector.name(),
        interval_secs = options.interval.as_secs_f64(),
        "Monitor started"
    );

    let mut sequence_id = monitor.next_sequence_id().await?;
    let mut interval = tokio::time::interval(options.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempted = 0u64;
    let mut completed = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Monitor cancelled");
                break;
            }
            _ = interval.tick() => {}
        }

        match monitor.run_cycle(sequence_id).await {
            Ok(report) => {
                completed += 1;
                sequence_id += 1;
                info!(
                    sequence_id = report.sequence_id,
                    status = %report.status,
                    confidence = report.confidence,
                    findings = report.findings.len(),
                    "Cycle complete"
                );
            }
            Err(e) => {
                match e.downcast_ref::<AnalysisError>() {
                    Some(AnalysisError::Validation(v)) => {
                        warn!(sequence_id, "Observation rejected: {}", v);
                        // Do not hand the rejected id out again.
                        sequence_id += 1;
                    }
                    _ => error!(sequence_id, "Cycle failed: {:#}", e),
                }
                // Storage may hold ids the analyzer never accepted.
                match monitor.next_sequence_id().await {
                    Ok(next) => sequence_id = sequence_id.max(next),
                    Err(e) => warn!("Failed to re-read the sequence id: {:#}", e),
                }
            }
        }

        attempted += 1;
        if options.max_cycles.is_some_and(|max| attempted >= max) {
            debug!(attempted, "Cycle limit reached");
            break;
        }
    }

    info!(completed, attempted, "Monitor stopped");
    Ok(completed)
}
