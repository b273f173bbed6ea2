//! Anomaly detection and environmental status classification.

pub mod anomaly;
pub mod engine;
pub mod status;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::baseline::BaselineSnapshot;
use crate::analysis::temporal::{TemporalAnalysis, TrendDirection};
use crate::observation::Observation;

pub use engine::AnomalyDetector;
pub use status::{Deviation, DeviationBand, EnvironmentStatus};

/// Severity levels for detected anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => f.write_str("MEDIUM"),
            Severity::High => f.write_str("HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    CountDeviation,
    SignalDeviation,
    SignalInstability,
    SuddenChange,
    ChannelShift,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FindingKind::CountDeviation => "count-deviation",
            FindingKind::SignalDeviation => "signal-deviation",
            FindingKind::SignalInstability => "signal-instability",
            FindingKind::SuddenChange => "sudden-change",
            FindingKind::ChannelShift => "channel-shift",
        };
        f.write_str(s)
    }
}

/// The numbers behind a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Name of the test statistic, e.g. `z_score`.
    pub statistic: String,
    pub value: f64,
    /// Threshold (or fence) the statistic crossed.
    pub threshold: f64,
    pub observed: f64,
    pub expected: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub confidence: f64,
    pub feature: String,
    pub evidence: Evidence,
    pub description: String,
    /// Short-window trend agreeing with the deviation, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendDirection>,
}

/// Everything a detector may look at besides the observation itself.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub baseline: &'a BaselineSnapshot,
    pub previous: Option<&'a Observation>,
    pub temporal: Option<&'a TemporalAnalysis>,
}

/// Count findings by severity: `(high, medium)`.
pub fn severity_counts(findings: &[AnomalyFinding]) -> (usize, usize) {
    findings.iter().fold((0, 0), |(high, medium), f| match f.severity {
        Severity::High => (high + 1, medium),
        Severity::Medium => (high, medium + 1),
    })
}

/// One-line summary of a finding list.
pub fn summarize(findings: &[AnomalyFinding]) -> String {
    let (high, medium) = severity_counts(findings);
    let mut parts = Vec::new();
    if high > 0 {
        parts.push(format!("{} high-severity", high));
    }
    if medium > 0 {
        parts.push(format!("{} medium-severity", medium));
    }
    if parts.is_empty() {
        return "No anomalies detected. Environment within normal parameters.".to_string();
    }
    let noun = if findings.len() == 1 { "anomaly" } else { "anomalies" };
    format!("{} {} detected.", parts.join(" and "), noun)
}
