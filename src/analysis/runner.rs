use std::collections::VecDeque;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::baseline::{BaselineModel, BaselineStatus, UpdateOutcome};
use crate::analysis::fingerprint::{Fingerprint, FingerprintComparison, Fingerprinter};
use crate::analysis::temporal::{TemporalAnalysis, TemporalAnalyzer};
use crate::config::{Config, StatusConfig};
use crate::detect::status::{self, Deviation, EnvironmentStatus};
use crate::detect::{AnomalyDetector, AnomalyFinding, DetectionContext};
use crate::error::{AnalysisError, ValidationError};
use crate::observation::Observation;

/// Everything one analysis cycle concluded about one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub id: Uuid,
    pub sequence_id: u64,
    pub timestamp: DateTime<Utc>,
    pub status: EnvironmentStatus,
    pub confidence: f64,
    /// Baseline the observation was scored against (before folding it).
    pub baseline: BaselineStatus,
    pub baseline_updated: bool,
    pub deviation: Option<Deviation>,
    /// Baseline mean of the primary feature for this hour of day.
    pub hourly_expectation: Option<f64>,
    pub findings: Vec<AnomalyFinding>,
    pub temporal: TemporalAnalysis,
    pub fingerprint: Fingerprint,
    pub reference: Option<Fingerprint>,
    pub comparison: Option<FingerprintComparison>,
}

/// Owns the baseline and runs the per-observation analysis cycle.
#[derive(Clone)]
pub struct Analyzer {
    config: Config,
    baseline: BaselineModel,
    temporal: TemporalAnalyzer,
    detector: AnomalyDetector,
    fingerprinter: Fingerprinter,
    history: VecDeque<Observation>,
    history_limit: usize,
}

impl Analyzer {
    pub fn new(config: &Config) -> Self {
        Self::with_baseline(config, BaselineModel::new(config.baseline.clone()), Vec::new())
    }

    /// Resume from a persisted baseline and the most recent observations
    /// (ascending order).
    pub fn restore(config: &Config, mut baseline: BaselineModel, recent: Vec<Observation>) -> Self {
        baseline.reconfigure(config.baseline.clone());
        Self::with_baseline(config, baseline, recent)
    }

    fn with_baseline(config: &Config, baseline: BaselineModel, recent: Vec<Observation>) -> Self {
        let history_limit = config.temporal.windows.largest().max(2);
        let mut history: VecDeque<Observation> = recent.into();
        while history.len() > history_limit {
            history.pop_front();
        }
        Self {
            config: config.clone(),
            baseline,
            temporal: TemporalAnalyzer::new(config.temporal.clone()),
            detector: AnomalyDetector::new(config.anomaly.clone()),
            fingerprinter: Fingerprinter::new(&config.fingerprint),
            history,
            history_limit,
        }
    }

    pub fn baseline(&self) -> &BaselineModel {
        &self.baseline
    }

    pub fn status_config(&self) -> &StatusConfig {
        &self.config.status
    }

    /// Trailing view of the history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Observation> {
        self.history.iter()
    }

    /// Highest sequence id seen, whether folded, pending or only in history.
    pub fn last_sequence_id(&self) -> Option<u64> {
        let seen = self.history.back().map(|o| o.sequence_id);
        seen.max(self.baseline.last_sequence_id())
    }

    /// Run one analysis cycle: score against the current baseline, then
    /// offer the observation to it.
    pub fn process(&mut self, obs: Observation) -> Result<CycleReport, AnalysisError> {
        obs.validate()?;
        if let Some(last) = self.last_sequence_id() {
            if obs.sequence_id <= last {
                return Err(ValidationError::OutOfOrder {
                    sequence_id: obs.sequence_id,
                    last,
                }
                .into());
            }
        }

        let snapshot = self.baseline.snapshot();
        let has_baseline = snapshot.has_baseline();

        self.history.push_back(obs.clone());
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        self.history.make_contiguous();
        let history = self.history.as_slices().0;
        let previous = history.len().checked_sub(2).map(|i| &history[i]);

        let temporal = self.temporal.analyze(history);
        let ctx = DetectionContext {
            baseline: &snapshot,
            previous,
            temporal: Some(&temporal),
        };
        let findings = self.detector.detect(&obs, &ctx);

        let deviation = if has_baseline {
            status::primary_deviation(&obs, &snapshot, &self.config.status)
        } else {
            None
        };
        let env_status = status::classify(has_baseline, deviation.as_ref(), &findings);
        let confidence =
            status::overall_confidence(has_baseline, snapshot.status.confidence, &findings);

        let fingerprint = self.fingerprinter.compute(&obs);
        let reference = snapshot.reference_vector.as_deref().and_then(|v| {
            self.fingerprinter
                .from_canonical(v, snapshot.status.sample_count)
        });
        let comparison = reference
            .as_ref()
            .map(|r| self.fingerprinter.compare(&fingerprint, r));

        let hourly_expectation = if has_baseline {
            snapshot.hourly_means.get(&obs.timestamp.hour()).copied()
        } else {
            None
        };

        let outcome = self.baseline.offer(&obs)?;
        let baseline_updated = matches!(outcome, UpdateOutcome::Folded { .. });
        if let UpdateOutcome::Folded { folded } = outcome {
            let s = self.baseline.status();
            info!(
                folded,
                samples = s.sample_count,
                state = %s.state,
                confidence = s.confidence,
                "baseline updated"
            );
        }

        debug!(
            sequence_id = obs.sequence_id,
            status = %env_status,
            confidence,
            findings = findings.len(),
            "cycle analyzed"
        );

        Ok(CycleReport {
            id: Uuid::new_v4(),
            sequence_id: obs.sequence_id,
            timestamp: obs.timestamp,
            status: env_status,
            confidence,
            baseline: snapshot.status,
            baseline_updated,
            deviation,
            hourly_expectation,
            findings,
            temporal,
            fingerprint,
            reference,
            comparison,
        })
    }

    /// Replace the baseline with one built from `history`. An empty history
    /// (or one with no valid observation) keeps the existing baseline.
    pub fn rebuild(&mut self, history: &[Observation]) -> Result<BaselineStatus, AnalysisError> {
        let operation = "baseline rebuild";
        if history.is_empty() {
            return Err(AnalysisError::InsufficientData { operation });
        }
        let model = BaselineModel::build(&self.config.baseline, history);
        if model.sample_count() == 0 {
            return Err(AnalysisError::InsufficientData { operation });
        }
        self.baseline = model;

        let start = history.len().saturating_sub(self.history_limit);
        self.history = history[start..].iter().cloned().collect();

        let status = self.baseline.status();
        info!(
            samples = status.sample_count,
            state = %status.state,
            confidence = status.confidence,
            "baseline rebuilt"
        );
        Ok(status)
    }
}
