//! Environmental status: a small decision table over baseline presence, the
//! primary feature's deviation band and finding severity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::baseline::BaselineSnapshot;
use crate::config::StatusConfig;
use crate::detect::{AnomalyFinding, Severity};
use crate::observation::{Observation, PRIMARY_FEATURE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentStatus {
    NoBaseline,
    Normal,
    SlightlyElevated,
    SlightlyReduced,
    AnomalousHigh,
    AnomalousLow,
}

impl EnvironmentStatus {
    pub fn is_anomalous(self) -> bool {
        matches!(
            self,
            EnvironmentStatus::AnomalousHigh | EnvironmentStatus::AnomalousLow
        )
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentStatus::NoBaseline => "NO_BASELINE",
            EnvironmentStatus::Normal => "NORMAL",
            EnvironmentStatus::SlightlyElevated => "SLIGHTLY_ELEVATED",
            EnvironmentStatus::SlightlyReduced => "SLIGHTLY_REDUCED",
            EnvironmentStatus::AnomalousHigh => "ANOMALOUS_HIGH",
            EnvironmentStatus::AnomalousLow => "ANOMALOUS_LOW",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationBand {
    /// `|z| <= normal_band`
    Within,
    /// `normal_band < |z| < anomalous_band`
    Small,
    /// `|z| >= anomalous_band`
    Large,
}

/// How far the primary feature sits from its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub feature: String,
    pub observed: f64,
    pub expected: f64,
    pub std_dev: f64,
    pub z_score: f64,
    /// Difference from the baseline mean in percent, 0 when the mean is 0.
    pub percent: f64,
    pub band: DeviationBand,
}

pub fn band(z: f64, cfg: &StatusConfig) -> DeviationBand {
    let magnitude = z.abs();
    if magnitude <= cfg.normal_band {
        DeviationBand::Within
    } else if magnitude < cfg.anomalous_band {
        DeviationBand::Small
    } else {
        DeviationBand::Large
    }
}

/// Deviation of the primary feature, when both the observation and the
/// baseline carry it.
pub fn primary_deviation(
    obs: &Observation,
    baseline: &BaselineSnapshot,
    cfg: &StatusConfig,
) -> Option<Deviation> {
    let observed = obs.numeric(PRIMARY_FEATURE)?;
    let summary = baseline.feature(PRIMARY_FEATURE)?;
    let z = summary.z_score(observed);
    let percent = if summary.mean.abs() > 0.0 {
        (observed - summary.mean) / summary.mean.abs() * 100.0
    } else {
        0.0
    };
    Some(Deviation {
        feature: PRIMARY_FEATURE.to_string(),
        observed,
        expected: summary.mean,
        std_dev: summary.std_dev,
        z_score: z,
        percent,
        band: band(z, cfg),
    })
}

pub fn classify(
    has_baseline: bool,
    deviation: Option<&Deviation>,
    findings: &[AnomalyFinding],
) -> EnvironmentStatus {
    let any_high = findings.iter().any(|f| f.severity == Severity::High);
    let band = deviation.map_or(DeviationBand::Within, |d| d.band);
    // Zero deviation falls on the high side.
    let upward = deviation.map_or(true, |d| d.z_score >= 0.0);

    match (has_baseline, band, any_high, upward) {
        (false, _, _, _) => EnvironmentStatus::NoBaseline,
        (true, DeviationBand::Large, _, true) | (true, _, true, true) => {
            EnvironmentStatus::AnomalousHigh
        }
        (true, DeviationBand::Large, _, false) | (true, _, true, false) => {
            EnvironmentStatus::AnomalousLow
        }
        (true, DeviationBand::Small, false, true) => EnvironmentStatus::SlightlyElevated,
        (true, DeviationBand::Small, false, false) => EnvironmentStatus::SlightlyReduced,
        (true, DeviationBand::Within, false, _) => EnvironmentStatus::Normal,
    }
}

/// 0 without a baseline; otherwise baseline confidence scaled by the
/// strongest finding's confidence.
pub fn overall_confidence(
    has_baseline: bool,
    baseline_confidence: f64,
    findings: &[AnomalyFinding],
) -> f64 {
    if !has_baseline {
        return 0.0;
    }
    let strongest = findings
        .iter()
        .map(|f| f.confidence)
        .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.max(c))))
        .unwrap_or(1.0);
    (baseline_confidence * strongest).clamp(0.0, 1.0)
}
