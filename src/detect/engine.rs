use tracing::{debug, info, warn};

use crate::analysis::temporal::{TrendDirection, WindowLabel};
use crate::config::AnomalyConfig;
use crate::detect::anomaly::{self, Detector};
use crate::detect::{AnomalyFinding, DetectionContext, FindingKind, Severity};
use crate::observation::Observation;

/// Minimum short-window confidence before a trend is attached to a finding.
const TREND_CONTEXT_CONFIDENCE: f64 = 0.5;

const DETECTORS: [(&str, Detector); 5] = [
    ("zscore", anomaly::zscore),
    ("iqr", anomaly::iqr),
    ("signal_instability", anomaly::signal_instability),
    ("sudden_change", anomaly::sudden_change),
    ("channel_shift", anomaly::channel_shift),
];

/// Runs every detector against one observation and collects the findings.
#[derive(Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, obs: &Observation, ctx: &DetectionContext<'_>) -> Vec<AnomalyFinding> {
        let mut findings = Vec::new();
        for (name, detector) in DETECTORS {
            let found = detector(obs, ctx, &self.config);
            if !found.is_empty() {
                debug!(detector = name, count = found.len(), "detector fired");
            }
            findings.extend(found);
        }

        attach_trend_context(&mut findings, ctx);

        for f in &findings {
            match f.severity {
                Severity::High => warn!(
                    sequence_id = obs.sequence_id,
                    kind = %f.kind,
                    feature = %f.feature,
                    confidence = f.confidence,
                    "{}",
                    f.description
                ),
                Severity::Medium => info!(
                    sequence_id = obs.sequence_id,
                    kind = %f.kind,
                    feature = %f.feature,
                    confidence = f.confidence,
                    "{}",
                    f.description
                ),
            }
        }
        findings
    }
}

/// Record the short-window trend on count deviations it agrees with.
fn attach_trend_context(findings: &mut [AnomalyFinding], ctx: &DetectionContext<'_>) {
    let Some(short) = ctx.temporal.and_then(|t| {
        t.window(WindowLabel::Short)
            .filter(|w| w.confidence >= TREND_CONTEXT_CONFIDENCE)
            .map(|w| (t.feature.as_str(), w.direction))
    }) else {
        return;
    };
    let (feature, direction) = short;

    for f in findings
        .iter_mut()
        .filter(|f| f.kind == FindingKind::CountDeviation && f.feature == feature)
    {
        let agrees = match direction {
            TrendDirection::Rising => f.evidence.observed > f.evidence.expected,
            TrendDirection::Falling => f.evidence.observed < f.evidence.expected,
            _ => false,
        };
        if agrees {
            f.trend = Some(direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::baseline::BaselineModel;
    use crate::analysis::temporal::TemporalAnalyzer;
    use crate::config::{BaselineConfig, TemporalConfig};
    use crate::observation::fixtures::{history, observation};
    use crate::observation::BSSID_COUNT;

    #[test]
    fn test_collects_from_all_detectors() {
        let history = history(&vec![18.0; 100]);
        let snapshot = BaselineModel::build(&BaselineConfig::default(), &history).snapshot();
        let ctx = DetectionContext {
            baseline: &snapshot,
            previous: history.last(),
            temporal: None,
        };
        let findings = AnomalyDetector::new(AnomalyConfig::default()).detect(&observation(101, 30.0), &ctx);

        assert!(findings
            .iter()
            .any(|f| f.kind == FindingKind::CountDeviation && f.severity == Severity::High));
        assert!(findings.iter().any(|f| f.kind == FindingKind::SuddenChange));
    }

    #[test]
    fn test_no_baseline_runs_only_independent_detectors() {
        let snapshot = BaselineModel::build(&BaselineConfig::default(), &[]).snapshot();
        let previous = observation(1, 18.0);
        let ctx = DetectionContext {
            baseline: &snapshot,
            previous: Some(&previous),
            temporal: None,
        };
        let findings = AnomalyDetector::new(AnomalyConfig::default()).detect(&observation(2, 40.0), &ctx);
        assert!(!findings.is_empty());
        assert!(findings.iter().all(|f| matches!(
            f.kind,
            FindingKind::SuddenChange | FindingKind::SignalInstability
        )));
    }

    #[test]
    fn test_rising_trend_is_attached_to_high_count_deviation() {
        let mut counts: Vec<f64> = (0..90).map(|i| 16.0 + (i % 5) as f64).collect();
        counts.extend((0..10).map(|i| 20.0 + 2.0 * i as f64));
        let history = history(&counts);
        let snapshot = BaselineModel::build(&BaselineConfig::default(), &history[..90]).snapshot();
        let temporal = TemporalAnalyzer::new(TemporalConfig::default()).analyze(&history);
        let ctx = DetectionContext {
            baseline: &snapshot,
            previous: history.last(),
            temporal: Some(&temporal),
        };
        let findings = AnomalyDetector::new(AnomalyConfig::default()).detect(&observation(101, 40.0), &ctx);
        let count = findings
            .iter()
            .find(|f| f.feature == BSSID_COUNT && f.kind == FindingKind::CountDeviation)
            .unwrap();
        assert_eq!(count.trend, Some(TrendDirection::Rising));
    }
}
