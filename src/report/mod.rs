//! Human-readable and JSON renderings of a cycle report.

use std::fmt::Write;

use anyhow::Result;

use crate::analysis::{BaselineSnapshot, CycleReport};
use crate::detect;

/// Pretty-printed JSON of a report.
pub fn render_json(report: &CycleReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Multi-section text report, as printed by `scan` and `replay`.
pub fn render_text(report: &CycleReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, report);
    out
}

fn write_report(out: &mut String, r: &CycleReport) -> std::fmt::Result {
    writeln!(out, "=== Ambient Environment Report ===")?;
    writeln!(out, "Sequence:   {}", r.sequence_id)?;
    writeln!(out, "Timestamp:  {}", r.timestamp.to_rfc3339())?;
    writeln!(out, "Status:     {}", r.status)?;
    writeln!(out, "Confidence: {:.1}%", r.confidence * 100.0)?;
    writeln!(out)?;

    writeln!(out, "--- Baseline ---")?;
    writeln!(
        out,
        "State: {}  samples: {}  confidence: {:.1}%  version: {}",
        r.baseline.state,
        r.baseline.sample_count,
        r.baseline.confidence * 100.0,
        r.baseline.version
    )?;
    if r.baseline_updated {
        writeln!(out, "Baseline updated after this cycle.")?;
    }
    match &r.deviation {
        Some(d) => {
            writeln!(
                out,
                "{}: observed {:.1}, expected {:.1} (std {:.2}), z = {:+.2}, {:+.1}%",
                d.feature, d.observed, d.expected, d.std_dev, d.z_score, d.percent
            )?;
        }
        None => writeln!(out, "No baseline comparison available.")?,
    }
    if let Some(hourly) = r.hourly_expectation {
        writeln!(out, "Typical for this hour: {:.1}", hourly)?;
    }
    writeln!(out)?;

    writeln!(out, "--- Findings ---")?;
    if r.findings.is_empty() {
        writeln!(out, "(none)")?;
    } else {
        writeln!(
            out,
            "{:<8} {:<20} {:<14} {:>6}  {}",
            "SEVERITY", "KIND", "FEATURE", "CONF", "DESCRIPTION"
        )?;
        for f in &r.findings {
            let trend = f
                .trend
                .map(|t| format!(" [trend: {}]", t))
                .unwrap_or_default();
            writeln!(
                out,
                "{:<8} {:<20} {:<14} {:>5.0}%  {}{}",
                f.severity.to_string(),
                f.kind.to_string(),
                f.feature,
                f.confidence * 100.0,
                f.description,
                trend
            )?;
        }
    }
    writeln!(out, "{}", detect::summarize(&r.findings))?;
    writeln!(out)?;

    writeln!(out, "--- Trends ({}) ---", r.temporal.feature)?;
    for w in &r.temporal.windows {
        writeln!(
            out,
            "{:<12} n={:<4} mean={:<8.2} slope={:+.3}  confidence {:.0}%",
            w.label.to_string(),
            w.sample_count,
            w.mean,
            w.slope,
            w.confidence * 100.0
        )?;
    }
    writeln!(out, "{}", r.temporal.interpretation())?;
    writeln!(out)?;

    writeln!(out, "--- Fingerprint ---")?;
    writeln!(out, "Hash: {}", r.fingerprint.hash)?;
    match (&r.reference, &r.comparison) {
        (Some(reference), Some(cmp)) => {
            writeln!(out, "Reference: {}", reference.hash)?;
            writeln!(out, "{}", cmp.interpretation())?;
        }
        _ => writeln!(out, "No reference fingerprint yet.")?,
    }
    Ok(())
}

/// Text summary of the current baseline, as printed by `baseline show`.
pub fn render_baseline(snapshot: &BaselineSnapshot) -> String {
    let mut out = String::new();
    let _ = write_baseline(&mut out, snapshot);
    out
}

fn write_baseline(out: &mut String, b: &BaselineSnapshot) -> std::fmt::Result {
    let s = &b.status;
    writeln!(out, "State:       {}", s.state)?;
    writeln!(out, "Samples:     {}", s.sample_count)?;
    writeln!(out, "Confidence:  {:.1}%", s.confidence * 100.0)?;
    writeln!(out, "Version:     {}", s.version)?;
    match s.last_updated {
        Some(t) => writeln!(out, "Updated:     {}", t.to_rfc3339())?,
        None => writeln!(out, "Updated:     never")?,
    }
    if b.features.is_empty() {
        return Ok(());
    }

    writeln!(out)?;
    writeln!(
        out,
        "{:<14} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "FEATURE", "MEAN", "STD", "MIN", "P50", "P90", "MAX"
    )?;
    for (name, f) in &b.features {
        writeln!(
            out,
            "{:<14} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
            name, f.mean, f.std_dev, f.min, f.percentiles.p50, f.percentiles.p90, f.max
        )?;
    }

    if !b.channel_distribution.is_empty() {
        writeln!(out)?;
        let channels: Vec<String> = b
            .channel_distribution
            .iter()
            .map(|(ch, share)| format!("{}:{:.0}%", ch, share * 100.0))
            .collect();
        writeln!(out, "Channels: {}", channels.join(" "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, BaselineModel};
    use crate::config::Config;
    use crate::observation::fixtures::{history, observation};

    fn anomalous_report() -> CycleReport {
        let mut a = Analyzer::new(&Config::default());
        for obs in history(&vec![18.0; 100]) {
            a.process(obs).unwrap();
        }
        a.process(observation(101, 30.0)).unwrap()
    }

    #[test]
    fn test_text_report_sections() {
        let text = render_text(&anomalous_report());
        assert!(text.contains("Status:     ANOMALOUS_HIGH"));
        assert!(text.contains("State: STABLE  samples: 100"));
        assert!(text.contains("bssid_count: observed 30.0, expected 18.0"));
        assert!(text.contains("HIGH"));
        assert!(text.contains("count-deviation"));
        assert!(text.contains("high-severity"));
        assert!(text.contains("Environments"));
        assert!(text.contains("Short-term"));
    }

    #[test]
    fn test_text_report_without_baseline() {
        let mut a = Analyzer::new(&Config::default());
        let text = render_text(&a.process(observation(1, 18.0)).unwrap());
        assert!(text.contains("NO_BASELINE"));
        assert!(text.contains("No baseline comparison available."));
        assert!(text.contains("No anomalies detected."));
        assert!(text.contains("Temporal analysis: Insufficient historical data"));
        assert!(text.contains("No reference fingerprint yet."));
    }

    #[test]
    fn test_json_report_parses_back() {
        let report = anomalous_report();
        let json = render_json(&report).unwrap();
        assert!(json.contains("\"status\": \"ANOMALOUS_HIGH\""));
        let back: CycleReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence_id, report.sequence_id);
        assert_eq!(back.findings.len(), report.findings.len());
    }

    #[test]
    fn test_baseline_summary() {
        let cfg = Config::default();
        let empty = BaselineModel::new(cfg.baseline.clone()).snapshot();
        let text = render_baseline(&empty);
        assert!(text.contains("NO_BASELINE"));
        assert!(text.contains("never"));

        let model = BaselineModel::build(&cfg.baseline, &history(&vec![18.0; 20]));
        let text = render_baseline(&model.snapshot());
        assert!(text.contains("PROVISIONAL"));
        assert!(text.contains("bssid_count"));
        assert!(text.contains("Channels:"));
    }
}
