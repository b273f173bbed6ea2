//! Rolling statistical model of "normal" for one monitored location.
//!
//! The model is folded incrementally (Welford) so it never replays history.
//! `build` produces the same summary as folding the same observations one by
//! one, which keeps rebuilds and live updates interchangeable.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::fingerprint::canonical_vector;
use crate::analysis::stats::{percentile, variance, RunningStats, RunningVector, EPSILON};
use crate::config::BaselineConfig;
use crate::error::ValidationError;
use crate::observation::{Observation, PRIMARY_FEATURE};

/// Upper bound of the baseline confidence.
pub const CONFIDENCE_CEILING: f64 = 0.95;
/// Lower bound of the stability factor once the baseline is stable.
const MIN_STABILITY_FACTOR: f64 = 0.5;
/// Curvature of the count-based confidence ramp.
const CONFIDENCE_RATE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaselineState {
    NoBaseline,
    Provisional,
    Stable,
}

impl fmt::Display for BaselineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BaselineState::NoBaseline => "NO_BASELINE",
            BaselineState::Provisional => "PROVISIONAL",
            BaselineState::Stable => "STABLE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStatus {
    pub state: BaselineState,
    pub confidence: f64,
    pub sample_count: u64,
    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// What `offer` did with an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Queued; `pending` observations are waiting for the next fold.
    Deferred { pending: usize },
    /// The queue was folded into the model.
    Folded { folded: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

impl Percentiles {
    pub fn iqr(&self) -> f64 {
        self.p75 - self.p25
    }
}

/// Point-in-time statistics of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: Percentiles,
}

impl FeatureSummary {
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev.max(EPSILON)
    }
}

/// Immutable copy of everything detectors and reports read from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub status: BaselineStatus,
    pub features: BTreeMap<String, FeatureSummary>,
    pub channel_distribution: BTreeMap<u16, f64>,
    pub hourly_means: BTreeMap<u32, f64>,
    pub reference_vector: Option<Vec<f64>>,
}

impl BaselineSnapshot {
    pub fn feature(&self, name: &str) -> Option<&FeatureSummary> {
        self.features.get(name)
    }

    pub fn has_baseline(&self) -> bool {
        self.status.state != BaselineState::NoBaseline
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct FeatureTracker {
    stats: RunningStats,
    recent: VecDeque<f64>,
}

impl FeatureTracker {
    fn push(&mut self, value: f64, retain: usize) {
        self.stats.push(value);
        self.recent.push_back(value);
        self.trim(retain);
    }

    fn trim(&mut self, retain: usize) {
        while self.recent.len() > retain {
            self.recent.pop_front();
        }
    }

    fn summary(&self) -> FeatureSummary {
        let mut sorted: Vec<f64> = self.recent.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        FeatureSummary {
            count: self.stats.count(),
            mean: self.stats.mean(),
            std_dev: self.stats.std_dev(),
            min: self.stats.min(),
            max: self.stats.max(),
            percentiles: Percentiles {
                p10: percentile(&sorted, 10.0),
                p25: percentile(&sorted, 25.0),
                p50: percentile(&sorted, 50.0),
                p75: percentile(&sorted, 75.0),
                p90: percentile(&sorted, 90.0),
            },
        }
    }

    fn recent_variance(&self, window: usize) -> f64 {
        let skip = self.recent.len().saturating_sub(window);
        let tail: Vec<f64> = self.recent.iter().skip(skip).copied().collect();
        variance(&tail)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineModel {
    #[serde(skip)]
    config: BaselineConfig,
    sample_count: u64,
    features: BTreeMap<String, FeatureTracker>,
    hourly: BTreeMap<u32, RunningStats>,
    channel_totals: BTreeMap<u16, u64>,
    reference: RunningVector,
    confidence: f64,
    version: u64,
    last_updated: Option<DateTime<Utc>>,
    last_sequence_id: Option<u64>,
    #[serde(default)]
    pending: Vec<Observation>,
}

impl BaselineModel {
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            config,
            sample_count: 0,
            features: BTreeMap::new(),
            hourly: BTreeMap::new(),
            channel_totals: BTreeMap::new(),
            reference: RunningVector::default(),
            confidence: 0.0,
            version: 0,
            last_updated: None,
            last_sequence_id: None,
            pending: Vec::new(),
        }
    }

    /// Build a fresh model from a full history. Invalid or out-of-order
    /// observations are skipped with a warning; an empty history yields a
    /// model in `NoBaseline`.
    pub fn build(config: &BaselineConfig, history: &[Observation]) -> Self {
        let mut model = Self::new(config.clone());
        let mut skipped = 0usize;
        for obs in history {
            if let Err(e) = model.check(obs) {
                warn!(error = %e, "skipping observation during baseline build");
                skipped += 1;
                continue;
            }
            model.fold(obs);
        }
        if model.sample_count > 0 {
            model.version = 1;
        }
        model.refresh_confidence();
        debug!(
            samples = model.sample_count,
            skipped,
            confidence = model.confidence,
            "baseline built"
        );
        model
    }

    /// Replace the configuration, e.g. after restoring a persisted model.
    pub fn reconfigure(&mut self, config: BaselineConfig) {
        for tracker in self.features.values_mut() {
            tracker.trim(config.percentile_window);
        }
        self.config = config;
        self.refresh_confidence();
    }

    /// Fold one observation immediately.
    pub fn update(&mut self, obs: &Observation) -> Result<(), ValidationError> {
        self.check(obs)?;
        self.fold(obs);
        self.version += 1;
        self.refresh_confidence();
        Ok(())
    }

    /// Queue an observation and fold the queue once `update_interval`
    /// observations are pending.
    pub fn offer(&mut self, obs: &Observation) -> Result<UpdateOutcome, ValidationError> {
        self.check(obs)?;
        self.pending.push(obs.clone());
        if self.pending.len() < self.config.update_interval {
            return Ok(UpdateOutcome::Deferred {
                pending: self.pending.len(),
            });
        }

        let queued = std::mem::take(&mut self.pending);
        for pending in &queued {
            self.fold(pending);
        }
        self.version += 1;
        self.refresh_confidence();
        debug!(
            folded = queued.len(),
            samples = self.sample_count,
            version = self.version,
            "baseline updated"
        );
        Ok(UpdateOutcome::Folded {
            folded: queued.len(),
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn state(&self) -> BaselineState {
        if self.sample_count < self.config.provisional_observations {
            BaselineState::NoBaseline
        } else if self.sample_count < self.config.min_observations {
            BaselineState::Provisional
        } else {
            BaselineState::Stable
        }
    }

    pub fn status(&self) -> BaselineStatus {
        BaselineStatus {
            state: self.state(),
            confidence: self.confidence,
            sample_count: self.sample_count,
            version: self.version,
            last_updated: self.last_updated,
        }
    }

    pub fn feature(&self, name: &str) -> Option<FeatureSummary> {
        self.features.get(name).map(FeatureTracker::summary)
    }

    /// Running mean of the primary feature at `hour` (0-23), if any
    /// observation from that hour has been folded.
    pub fn hourly_mean(&self, hour: u32) -> Option<f64> {
        self.hourly
            .get(&hour)
            .filter(|s| !s.is_empty())
            .map(RunningStats::mean)
    }

    /// Share of access points per channel over all folded observations.
    pub fn channel_distribution(&self) -> BTreeMap<u16, f64> {
        let total: u64 = self.channel_totals.values().sum();
        if total == 0 {
            return BTreeMap::new();
        }
        self.channel_totals
            .iter()
            .map(|(&ch, &n)| (ch, n as f64 / total as f64))
            .collect()
    }

    /// Running mean of the canonical fingerprint vector.
    pub fn reference_vector(&self) -> Option<&[f64]> {
        self.reference.mean()
    }

    pub fn snapshot(&self) -> BaselineSnapshot {
        BaselineSnapshot {
            status: self.status(),
            features: self
                .features
                .iter()
                .map(|(name, t)| (name.clone(), t.summary()))
                .collect(),
            channel_distribution: self.channel_distribution(),
            hourly_means: self
                .hourly
                .iter()
                .map(|(&h, s)| (h, s.mean()))
                .collect(),
            reference_vector: self.reference_vector().map(<[f64]>::to_vec),
        }
    }

    /// Newest sequence id seen, folded or pending.
    pub fn last_sequence_id(&self) -> Option<u64> {
        self.pending
            .last()
            .map(|p| p.sequence_id)
            .or(self.last_sequence_id)
    }

    fn check(&self, obs: &Observation) -> Result<(), ValidationError> {
        obs.validate()?;
        if let Some(last) = self.last_sequence_id() {
            if obs.sequence_id <= last {
                return Err(ValidationError::OutOfOrder {
                    sequence_id: obs.sequence_id,
                    last,
                });
            }
        }
        Ok(())
    }

    fn fold(&mut self, obs: &Observation) {
        let retain = self.config.percentile_window;
        for (name, value) in obs.numeric_features() {
            self.features
                .entry(name.to_string())
                .or_default()
                .push(value, retain);
        }
        if let Some(primary) = obs.numeric(PRIMARY_FEATURE) {
            self.hourly
                .entry(obs.timestamp.hour())
                .or_default()
                .push(primary);
        }
        for (channel, count) in obs.channels() {
            *self.channel_totals.entry(channel).or_insert(0) += u64::from(count);
        }
        self.reference.push(&canonical_vector(obs));
        self.sample_count += 1;
        self.last_sequence_id = Some(obs.sequence_id);
        self.last_updated = Some(obs.timestamp);
    }

    fn refresh_confidence(&mut self) {
        let min_obs = self.config.min_observations.max(1);
        if self.sample_count < min_obs {
            self.confidence = count_confidence(self.sample_count, min_obs);
            return;
        }
        let factor = self
            .features
            .get(PRIMARY_FEATURE)
            .map(|t| {
                stability_factor(
                    t.recent_variance(self.config.rolling_window),
                    t.stats.variance(),
                    self.config.stability_threshold,
                )
            })
            .unwrap_or(1.0);
        self.confidence = CONFIDENCE_CEILING * factor;
    }
}

/// `ceiling * (1 - e^(-3x)) / (1 - e^(-3))` with `x = min(n, cap) / cap`.
pub fn count_confidence(n: u64, min_observations: u64) -> f64 {
    let cap = min_observations.max(1);
    let x = n.min(cap) as f64 / cap as f64;
    CONFIDENCE_CEILING * (1.0 - (-CONFIDENCE_RATE * x).exp()) / (1.0 - (-CONFIDENCE_RATE).exp())
}

/// 1 while recent variance stays within `1 + threshold` of the historical
/// variance, then shrinking inversely with the excess, floored at 0.5.
pub fn stability_factor(recent_var: f64, overall_var: f64, threshold: f64) -> f64 {
    let ratio = recent_var.max(EPSILON) / overall_var.max(EPSILON);
    let limit = 1.0 + threshold;
    if ratio <= limit {
        1.0
    } else {
        (limit / ratio).max(MIN_STABILITY_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stats;
    use crate::observation::fixtures::{history, observation};
    use crate::observation::{BSSID_COUNT, SIGNAL_MEAN};
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn config() -> BaselineConfig {
        BaselineConfig::default()
    }

    fn counts(n: usize, value: f64) -> Vec<f64> {
        vec![value; n]
    }

    #[test]
    fn test_empty_history_has_no_baseline() {
        let model = BaselineModel::build(&config(), &[]);
        let status = model.status();
        assert_eq!(status.state, BaselineState::NoBaseline);
        assert_eq!(status.confidence, 0.0);
        assert_eq!(status.sample_count, 0);
        assert_eq!(status.version, 0);
        assert!(model.reference_vector().is_none());
        assert!(model.channel_distribution().is_empty());
    }

    #[test]
    fn test_state_thresholds() {
        let cfg = config();
        assert_eq!(
            BaselineModel::build(&cfg, &history(&counts(9, 18.0))).state(),
            BaselineState::NoBaseline
        );
        assert_eq!(
            BaselineModel::build(&cfg, &history(&counts(10, 18.0))).state(),
            BaselineState::Provisional
        );
        assert_eq!(
            BaselineModel::build(&cfg, &history(&counts(99, 18.0))).state(),
            BaselineState::Provisional
        );
        assert_eq!(
            BaselineModel::build(&cfg, &history(&counts(100, 18.0))).state(),
            BaselineState::Stable
        );
    }

    #[test]
    fn test_confidence_is_non_decreasing_until_cap() {
        let cfg = config();
        let mut model = BaselineModel::new(cfg.clone());
        let mut previous = model.confidence();
        for (i, obs) in history(&counts(100, 18.0)).iter().enumerate() {
            model.update(obs).unwrap();
            let c = model.confidence();
            assert!(c >= previous, "confidence dropped at sample {}", i + 1);
            assert!(c <= CONFIDENCE_CEILING + 1e-12);
            previous = c;
        }
        assert_relative_eq!(model.confidence(), CONFIDENCE_CEILING, epsilon = 1e-12);
    }

    #[test]
    fn test_count_confidence_formula() {
        assert_eq!(count_confidence(0, 100), 0.0);
        assert_relative_eq!(count_confidence(100, 100), CONFIDENCE_CEILING, epsilon = 1e-12);
        assert_relative_eq!(count_confidence(500, 100), CONFIDENCE_CEILING, epsilon = 1e-12);
        let half = 0.95 * (1.0 - (-1.5f64).exp()) / (1.0 - (-3.0f64).exp());
        assert_relative_eq!(count_confidence(50, 100), half, epsilon = 1e-12);
    }

    #[test]
    fn test_stability_factor() {
        assert_eq!(stability_factor(0.0, 0.0, 0.5), 1.0);
        assert_eq!(stability_factor(1.4, 1.0, 0.5), 1.0);
        assert_relative_eq!(stability_factor(3.0, 1.0, 0.5), 0.5);
        assert_relative_eq!(stability_factor(2.0, 1.0, 0.5), 0.75);
        assert_eq!(stability_factor(100.0, 1.0, 0.5), 0.5);
    }

    #[test]
    fn test_recent_volatility_lowers_confidence() {
        let mut values: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 18.0 } else { 19.0 }).collect();
        values.extend((0..50).map(|i| if i % 2 == 0 { 10.0 } else { 30.0 }));
        let model = BaselineModel::build(&config(), &history(&values));
        assert_eq!(model.state(), BaselineState::Stable);
        // recent variance 100, overall 34: factor 1.5 / (100 / 34)
        assert_relative_eq!(model.confidence(), 0.95 * 1.5 * 34.0 / 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_sequences_give_identical_confidence() {
        let values: Vec<f64> = (0..130).map(|i| 15.0 + (i % 7) as f64).collect();
        let a = BaselineModel::build(&config(), &history(&values));
        let b = BaselineModel::build(&config(), &history(&values));
        assert_eq!(a.confidence(), b.confidence());
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_incremental_matches_build_and_two_pass() {
        let values: Vec<f64> = (0..57).map(|i| 12.0 + ((i * 7) % 11) as f64).collect();
        let obs = history(&values);

        let built = BaselineModel::build(&config(), &obs);
        let mut incremental = BaselineModel::new(config());
        for o in &obs {
            incremental.update(o).unwrap();
        }

        let b = built.feature(BSSID_COUNT).unwrap();
        let i = incremental.feature(BSSID_COUNT).unwrap();
        assert_relative_eq!(b.mean, i.mean, epsilon = 1e-9);
        assert_relative_eq!(b.std_dev, i.std_dev, epsilon = 1e-9);
        assert_relative_eq!(b.mean, stats::mean(&values), epsilon = 1e-9);
        assert_relative_eq!(b.std_dev, stats::std_dev(&values), epsilon = 1e-9);
        assert_eq!(built.confidence(), incremental.confidence());
        assert_eq!(built.channel_distribution(), incremental.channel_distribution());
    }

    #[test]
    fn test_build_skips_invalid_observations() {
        let mut obs = history(&counts(12, 18.0));
        obs[3].features.remove(SIGNAL_MEAN);
        obs[7] = obs[7].clone().with_feature(BSSID_COUNT, f64::INFINITY);
        let model = BaselineModel::build(&config(), &obs);
        assert_eq!(model.sample_count(), 10);
        assert_eq!(model.state(), BaselineState::Provisional);
    }

    #[test]
    fn test_update_rejects_invalid_without_mutation() {
        let mut model = BaselineModel::build(&config(), &history(&counts(20, 18.0)));
        let before = model.clone();

        let mut bad = observation(21, 18.0);
        bad.features.remove(BSSID_COUNT);
        assert!(matches!(
            model.update(&bad),
            Err(ValidationError::MissingFeature { .. })
        ));
        assert_eq!(model, before);

        assert!(matches!(
            model.update(&observation(20, 18.0)),
            Err(ValidationError::OutOfOrder { sequence_id: 20, last: 20 })
        ));
        assert_eq!(model, before);
    }

    #[test]
    fn test_offer_folds_every_update_interval() {
        let mut model = BaselineModel::new(config());
        let obs = history(&counts(25, 18.0));
        for (i, o) in obs.iter().enumerate().take(9) {
            assert_eq!(
                model.offer(o).unwrap(),
                UpdateOutcome::Deferred { pending: i + 1 }
            );
        }
        assert_eq!(model.sample_count(), 0);
        assert_eq!(model.offer(&obs[9]).unwrap(), UpdateOutcome::Folded { folded: 10 });
        assert_eq!(model.sample_count(), 10);
        assert_eq!(model.status().version, 1);

        for o in &obs[10..25] {
            model.offer(o).unwrap();
        }
        assert_eq!(model.sample_count(), 20);
        assert_eq!(model.pending(), 5);

        // Pending ids count for ordering.
        assert!(model.offer(&obs[22]).is_err());
    }

    #[test]
    fn test_percentiles_use_bounded_window() {
        let cfg = BaselineConfig {
            percentile_window: 50,
            ..config()
        };
        let mut values = counts(100, 1000.0);
        values.extend((1..=50).map(f64::from));
        let model = BaselineModel::build(&cfg, &history(&values));
        let summary = model.feature(BSSID_COUNT).unwrap();
        assert_eq!(summary.count, 150);
        assert_eq!(summary.max, 1000.0);
        // Percentiles only see the latest 50 values (1..=50).
        assert_relative_eq!(summary.percentiles.p50, 25.5, epsilon = 1e-9);
        assert_relative_eq!(summary.percentiles.p10, 5.9, epsilon = 1e-9);
        assert_relative_eq!(summary.percentiles.p90, 45.1, epsilon = 1e-9);
    }

    #[test]
    fn test_hourly_means() {
        let morning = Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 3, 1, 20, 15, 0).unwrap();
        let obs = vec![
            Observation { timestamp: morning, ..observation(1, 10.0) },
            Observation { timestamp: morning, ..observation(2, 14.0) },
            Observation { timestamp: evening, ..observation(3, 30.0) },
        ];
        let model = BaselineModel::build(&config(), &obs);
        assert_eq!(model.hourly_mean(8), Some(12.0));
        assert_eq!(model.hourly_mean(20), Some(30.0));
        assert_eq!(model.hourly_mean(3), None);
    }

    #[test]
    fn test_channel_distribution_and_reference() {
        let model = BaselineModel::build(&config(), &history(&[10.0, 20.0]));
        let dist = model.channel_distribution();
        // Fixture histogram: {1: 2, 6: 3, 11: 1, 36: 2}
        assert_relative_eq!(dist[&6], 3.0 / 8.0);
        assert_relative_eq!(dist.values().sum::<f64>(), 1.0, epsilon = 1e-12);

        let reference = model.reference_vector().unwrap();
        assert_eq!(reference.len(), 6);
        assert_relative_eq!(reference[0], 15.0);
    }

    #[test]
    fn test_serde_roundtrip_with_reconfigure() {
        let mut model = BaselineModel::build(&config(), &history(&counts(30, 18.0)));
        model.offer(&observation(31, 18.0)).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let mut restored: BaselineModel = serde_json::from_str(&json).unwrap();
        restored.reconfigure(config());
        assert_eq!(restored, model);
        assert_eq!(restored.pending(), 1);
    }
}
