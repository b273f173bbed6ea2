//! The individual detectors. Each is a pure function of the current
//! observation, its context and the anomaly thresholds.

use std::collections::BTreeSet;

use crate::analysis::stats::EPSILON;
use crate::config::{AnomalyConfig, DetectionMethod};
use crate::detect::{AnomalyFinding, DetectionContext, Evidence, FindingKind, Severity};
use crate::observation::{self, is_count_feature, Observation};

/// Sigma of a normal distribution expressed in interquartile ranges.
const IQR_TO_SIGMA: f64 = 1.349;

pub type Detector = fn(&Observation, &DetectionContext<'_>, &AnomalyConfig) -> Vec<AnomalyFinding>;

/// `0.5 + 0.5 * (1 - e^(-2 * excess))`, saturating in [0.5, 1).
pub fn confidence_from_excess(excess: f64) -> f64 {
    0.5 + 0.5 * (1.0 - (-2.0 * excess.max(0.0)).exp())
}

/// Confidence for evidence `value` past its first threshold.
pub fn finding_confidence(value: f64, threshold: f64) -> f64 {
    confidence_from_excess(value / threshold.max(EPSILON) - 1.0)
}

fn deviation_kind(feature: &str) -> FindingKind {
    if is_count_feature(feature) {
        FindingKind::CountDeviation
    } else {
        FindingKind::SignalDeviation
    }
}

fn direction_word(delta: f64) -> &'static str {
    if delta >= 0.0 {
        "high"
    } else {
        "low"
    }
}

/// Z-score of every baseline-tracked numeric feature.
pub fn zscore(obs: &Observation, ctx: &DetectionContext<'_>, cfg: &AnomalyConfig) -> Vec<AnomalyFinding> {
    if cfg.method != DetectionMethod::Zscore || !ctx.baseline.has_baseline() {
        return Vec::new();
    }
    let thresholds = cfg.zscore_threshold;
    let mut findings = Vec::new();

    for (name, value) in obs.numeric_features() {
        let Some(summary) = ctx.baseline.feature(name) else {
            continue;
        };
        let z = summary.z_score(value);
        let (severity, crossed) = if z.abs() > thresholds.high {
            (Severity::High, thresholds.high)
        } else if z.abs() > thresholds.medium {
            (Severity::Medium, thresholds.medium)
        } else {
            continue;
        };

        findings.push(AnomalyFinding {
            kind: deviation_kind(name),
            severity,
            confidence: finding_confidence(z.abs(), thresholds.medium),
            feature: name.to_string(),
            evidence: Evidence {
                statistic: "z_score".to_string(),
                value: z,
                threshold: crossed,
                observed: value,
                expected: summary.mean,
            },
            description: format!(
                "{} ({:.1}) is significantly {} (z-score: {:.2}, expected {:.1})",
                name,
                value,
                direction_word(z),
                z,
                summary.mean
            ),
            trend: None,
        });
    }
    findings
}

/// Tukey fences on the retained percentile window of every tracked feature.
pub fn iqr(obs: &Observation, ctx: &DetectionContext<'_>, cfg: &AnomalyConfig) -> Vec<AnomalyFinding> {
    if cfg.method != DetectionMethod::Iqr || !ctx.baseline.has_baseline() {
        return Vec::new();
    }
    let mut findings = Vec::new();

    for (name, value) in obs.numeric_features() {
        let Some(summary) = ctx.baseline.feature(name) else {
            continue;
        };
        let p = summary.percentiles;
        let spread = p.iqr();
        let lower = p.p25 - cfg.iqr_multiplier * spread;
        let upper = p.p75 + cfg.iqr_multiplier * spread;

        let (distance, fence) = if value > upper {
            (value - upper, upper)
        } else if value < lower {
            (lower - value, lower)
        } else {
            continue;
        };

        let sigma = if spread > EPSILON {
            spread / IQR_TO_SIGMA
        } else {
            summary.std_dev.max(EPSILON)
        };
        // Distance past the fence, in standard deviations, cut like a z-score.
        let score = distance / sigma;
        let severity = if score > cfg.zscore_threshold.high {
            Severity::High
        } else if score > cfg.zscore_threshold.medium {
            Severity::Medium
        } else {
            continue;
        };

        findings.push(AnomalyFinding {
            kind: deviation_kind(name),
            severity,
            confidence: confidence_from_excess(score),
            feature: name.to_string(),
            evidence: Evidence {
                statistic: "iqr_fence_distance".to_string(),
                value: score,
                threshold: fence,
                observed: value,
                expected: p.p50,
            },
            description: format!(
                "{} ({:.1}) is outside the interquartile fences [{:.1}, {:.1}] by {:.2} sigma",
                name, value, lower, upper, score
            ),
            trend: None,
        });
    }
    findings
}

/// Signal spread large relative to its mean. Needs no baseline.
pub fn signal_instability(
    obs: &Observation,
    _ctx: &DetectionContext<'_>,
    cfg: &AnomalyConfig,
) -> Vec<AnomalyFinding> {
    let (Some(mean), Some(std)) = (
        obs.numeric(observation::SIGNAL_MEAN),
        obs.numeric(observation::SIGNAL_STD),
    ) else {
        return Vec::new();
    };
    if std <= 0.0 {
        return Vec::new();
    }
    let cv = std / mean.abs().max(EPSILON);
    if cv <= cfg.instability_threshold {
        return Vec::new();
    }

    vec![AnomalyFinding {
        kind: FindingKind::SignalInstability,
        severity: Severity::Medium,
        confidence: finding_confidence(cv, cfg.instability_threshold),
        feature: observation::SIGNAL_STD.to_string(),
        evidence: Evidence {
            statistic: "coefficient_of_variation".to_string(),
            value: cv,
            threshold: cfg.instability_threshold,
            observed: std,
            expected: mean.abs() * cfg.instability_threshold,
        },
        description: format!(
            "Signal strength highly unstable (std: {:.1}, mean: {:.1})",
            std, mean
        ),
        trend: None,
    }]
}

/// Spike or drop of the primary feature versus the previous observation.
/// Needs no baseline.
pub fn sudden_change(
    obs: &Observation,
    ctx: &DetectionContext<'_>,
    cfg: &AnomalyConfig,
) -> Vec<AnomalyFinding> {
    let Some(previous) = ctx.previous else {
        return Vec::new();
    };
    let (Some(current), Some(before)) = (
        obs.numeric(observation::PRIMARY_FEATURE),
        previous.numeric(observation::PRIMARY_FEATURE),
    ) else {
        return Vec::new();
    };

    let delta = current - before;
    let relative = delta / before.abs().max(1.0);
    if relative.abs() <= cfg.sudden_change_threshold || delta.abs() <= cfg.sudden_change_min_delta {
        return Vec::new();
    }

    let what = if delta > 0.0 { "spike" } else { "drop" };
    vec![AnomalyFinding {
        kind: FindingKind::SuddenChange,
        severity: Severity::High,
        confidence: finding_confidence(relative.abs(), cfg.sudden_change_threshold),
        feature: observation::PRIMARY_FEATURE.to_string(),
        evidence: Evidence {
            statistic: "relative_change".to_string(),
            value: relative,
            threshold: cfg.sudden_change_threshold,
            observed: current,
            expected: before,
        },
        description: format!(
            "Sudden {} in {}: {:.0} vs previous {:.0} ({:+.1}%)",
            what,
            observation::PRIMARY_FEATURE,
            current,
            before,
            relative * 100.0
        ),
        trend: None,
    }]
}

/// Total-variation distance between current and baseline channel usage.
pub fn channel_shift(
    obs: &Observation,
    ctx: &DetectionContext<'_>,
    cfg: &AnomalyConfig,
) -> Vec<AnomalyFinding> {
    let expected = &ctx.baseline.channel_distribution;
    if !ctx.baseline.has_baseline() || expected.is_empty() {
        return Vec::new();
    }
    let histogram = obs.channels();
    let total: u32 = histogram.values().sum();
    if total == 0 {
        return Vec::new();
    }

    let channels: BTreeSet<u16> = histogram.keys().chain(expected.keys()).copied().collect();
    let mut distance = 0.0;
    let mut largest: Option<(u16, f64, f64)> = None;
    for channel in channels {
        let current = histogram.get(&channel).map_or(0.0, |&n| f64::from(n) / f64::from(total));
        let baseline = expected.get(&channel).copied().unwrap_or(0.0);
        let gap = (current - baseline).abs();
        distance += gap;
        if largest.map_or(true, |(_, c, b)| gap > (c - b).abs()) {
            largest = Some((channel, current, baseline));
        }
    }
    distance *= 0.5;

    if distance <= cfg.channel_shift_threshold {
        return Vec::new();
    }
    let (channel, current, baseline) = largest.unwrap_or((0, 0.0, 0.0));

    vec![AnomalyFinding {
        kind: FindingKind::ChannelShift,
        severity: Severity::Medium,
        confidence: finding_confidence(distance, cfg.channel_shift_threshold),
        feature: observation::CHANNELS.to_string(),
        evidence: Evidence {
            statistic: "total_variation".to_string(),
            value: distance,
            threshold: cfg.channel_shift_threshold,
            observed: current,
            expected: baseline,
        },
        description: format!(
            "Channel usage shifted from baseline (distance {:.2}); channel {} at {:.1}% vs baseline {:.1}%",
            distance,
            channel,
            current * 100.0,
            baseline * 100.0
        ),
        trend: None,
    }]
}
