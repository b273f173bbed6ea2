//! Multi-window trend analysis over the observation history.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::stats::{self, linear_fit, trend_smoothed, EPSILON};
use crate::config::TemporalConfig;
use crate::observation::Observation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowLabel {
    Short,
    Medium,
    Long,
}

impl fmt::Display for WindowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WindowLabel::Short => "Short-term",
            WindowLabel::Medium => "Medium-term",
            WindowLabel::Long => "Long-term",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
    Insufficient,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Rising => "Rising",
            TrendDirection::Falling => "Falling",
            TrendDirection::Stable => "Stable",
            TrendDirection::Insufficient => "Insufficient data",
        };
        f.write_str(s)
    }
}

/// Trend judgment for one sliding window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub label: WindowLabel,
    pub window_size: usize,
    pub sample_count: usize,
    pub first_sequence_id: Option<u64>,
    pub last_sequence_id: Option<u64>,
    /// Latest value of the smoothed series.
    pub smoothed: Option<f64>,
    /// Least-squares slope of the smoothed series, per sample.
    pub slope: f64,
    /// Change implied by the slope across the window, relative to its mean.
    pub relative_change: f64,
    /// Change between the first and last smoothed value, in percent.
    pub change_percent: f64,
    pub direction: TrendDirection,
    pub confidence: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl WindowResult {
    fn insufficient(label: WindowLabel, window_size: usize, values: &[(u64, f64)]) -> Self {
        let raw: Vec<f64> = values.iter().map(|&(_, v)| v).collect();
        Self {
            label,
            window_size,
            sample_count: values.len(),
            first_sequence_id: values.first().map(|&(id, _)| id),
            last_sequence_id: values.last().map(|&(id, _)| id),
            smoothed: raw.last().copied(),
            slope: 0.0,
            relative_change: 0.0,
            change_percent: 0.0,
            direction: TrendDirection::Insufficient,
            confidence: fill_ratio(values.len(), window_size),
            mean: stats::mean(&raw),
            std_dev: stats::std_dev(&raw),
        }
    }

    /// e.g. `Short-term: Rising (+90.0%)`.
    pub fn describe(&self) -> String {
        match self.direction {
            TrendDirection::Rising | TrendDirection::Falling => {
                format!("{}: {} ({:+.1}%)", self.label, self.direction, self.change_percent)
            }
            _ => format!("{}: {}", self.label, self.direction),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalAnalysis {
    pub feature: String,
    pub windows: Vec<WindowResult>,
}

impl TemporalAnalysis {
    pub fn window(&self, label: WindowLabel) -> Option<&WindowResult> {
        self.windows.iter().find(|w| w.label == label)
    }

    /// True when no window had enough samples to classify.
    pub fn is_insufficient(&self) -> bool {
        self.windows
            .iter()
            .all(|w| w.direction == TrendDirection::Insufficient)
    }

    /// One line summarizing every window.
    pub fn interpretation(&self) -> String {
        if self.is_insufficient() {
            return "Temporal analysis: Insufficient historical data".to_string();
        }
        self.windows
            .iter()
            .filter(|w| w.direction != TrendDirection::Insufficient)
            .map(WindowResult::describe)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[derive(Clone)]
pub struct TemporalAnalyzer {
    config: TemporalConfig,
}

impl TemporalAnalyzer {
    pub fn new(config: TemporalConfig) -> Self {
        Self { config }
    }

    /// Analyze the configured feature over every window. `history` is in
    /// ascending sequence order; observations lacking the feature are
    /// ignored.
    pub fn analyze(&self, history: &[Observation]) -> TemporalAnalysis {
        let series: Vec<(u64, f64)> = history
            .iter()
            .filter_map(|obs| obs.numeric(&self.config.feature).map(|v| (obs.sequence_id, v)))
            .collect();

        let sizes = self.config.windows;
        let windows = [
            (WindowLabel::Short, sizes.short),
            (WindowLabel::Medium, sizes.medium),
            (WindowLabel::Long, sizes.long),
        ]
        .into_iter()
        .map(|(label, size)| {
            let start = series.len().saturating_sub(size);
            self.analyze_window(label, size, &series[start..])
        })
        .collect();

        TemporalAnalysis {
            feature: self.config.feature.clone(),
            windows,
        }
    }

    fn analyze_window(&self, label: WindowLabel, size: usize, values: &[(u64, f64)]) -> WindowResult {
        if values.len() < 2 {
            return WindowResult::insufficient(label, size, values);
        }

        let raw: Vec<f64> = values.iter().map(|&(_, v)| v).collect();
        let smoothed = trend_smoothed(&raw, self.config.smoothing_factor);
        let (slope, _) = linear_fit(&smoothed);

        let n = smoothed.len();
        let level = stats::mean(&smoothed).abs().max(EPSILON);
        let relative_change = slope * (n - 1) as f64 / level;

        let direction = if relative_change > self.config.change_threshold {
            TrendDirection::Rising
        } else if relative_change < -self.config.change_threshold {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        };

        let first = smoothed[0];
        let last = smoothed[n - 1];
        let change_percent = if first.abs() < EPSILON {
            0.0
        } else {
            (last - first) / first.abs() * 100.0
        };

        WindowResult {
            label,
            window_size: size,
            sample_count: n,
            first_sequence_id: values.first().map(|&(id, _)| id),
            last_sequence_id: values.last().map(|&(id, _)| id),
            smoothed: Some(last),
            slope,
            relative_change,
            change_percent,
            direction,
            confidence: fill_ratio(n, size),
            mean: stats::mean(&raw),
            std_dev: stats::std_dev(&raw),
        }
    }
}

fn fill_ratio(samples: usize, window: usize) -> f64 {
    if window == 0 {
        return 0.0;
    }
    (samples as f64 / window as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::fixtures::history;
    use approx::assert_relative_eq;

    fn analyzer() -> TemporalAnalyzer {
        TemporalAnalyzer::new(TemporalConfig::default())
    }

    #[test]
    fn test_linear_ramp_is_rising_by_ninety_percent() {
        let counts: Vec<f64> = (10..20).map(f64::from).collect();
        let result = analyzer().analyze(&history(&counts));

        let short = result.window(WindowLabel::Short).unwrap();
        assert_eq!(short.direction, TrendDirection::Rising);
        assert_eq!(short.sample_count, 10);
        assert_eq!(short.confidence, 1.0);
        assert_relative_eq!(short.change_percent, 90.0, epsilon = 1e-6);
        assert_relative_eq!(short.slope, 1.0, epsilon = 1e-9);
        assert_eq!(short.first_sequence_id, Some(1));
        assert_eq!(short.last_sequence_id, Some(10));
        assert_eq!(short.describe(), "Short-term: Rising (+90.0%)");

        // Larger windows reuse what exists, with lower confidence.
        let medium = result.window(WindowLabel::Medium).unwrap();
        assert_eq!(medium.direction, TrendDirection::Rising);
        assert_relative_eq!(medium.confidence, 0.2);
        let long = result.window(WindowLabel::Long).unwrap();
        assert_relative_eq!(long.confidence, 0.05);
    }

    #[test]
    fn test_falling_and_stable() {
        let falling: Vec<f64> = (0..10).map(|i| 30.0 - 2.0 * i as f64).collect();
        let result = analyzer().analyze(&history(&falling));
        let short = result.window(WindowLabel::Short).unwrap();
        assert_eq!(short.direction, TrendDirection::Falling);
        assert!(short.change_percent < 0.0);

        let flat = vec![18.0, 19.0, 18.0, 17.0, 18.0, 19.0, 18.0, 17.0, 18.0, 18.0];
        let result = analyzer().analyze(&history(&flat));
        assert_eq!(
            result.window(WindowLabel::Short).unwrap().direction,
            TrendDirection::Stable
        );
    }

    #[test]
    fn test_empty_history_is_insufficient() {
        let result = analyzer().analyze(&[]);
        assert_eq!(result.windows.len(), 3);
        assert!(result.is_insufficient());
        for w in &result.windows {
            assert_eq!(w.sample_count, 0);
            assert_eq!(w.confidence, 0.0);
            assert_eq!(w.first_sequence_id, None);
        }
        assert_eq!(
            result.interpretation(),
            "Temporal analysis: Insufficient historical data"
        );
    }

    #[test]
    fn test_single_sample_is_insufficient_with_low_confidence() {
        let result = analyzer().analyze(&history(&[18.0]));
        let short = result.window(WindowLabel::Short).unwrap();
        assert_eq!(short.direction, TrendDirection::Insufficient);
        assert_relative_eq!(short.confidence, 0.1);
        assert_eq!(short.mean, 18.0);
    }

    #[test]
    fn test_zero_start_reports_zero_percent() {
        let values = vec![0.0, 1.0, 2.0, 3.0];
        let short = analyzer().analyze(&history(&values)).windows[0].clone();
        assert_eq!(short.direction, TrendDirection::Rising);
        assert_eq!(short.change_percent, 0.0);
    }

    #[test]
    fn test_windows_take_latest_samples() {
        let mut values = vec![50.0; 40];
        values.extend((0..10).map(|i| 10.0 + i as f64));
        let result = analyzer().analyze(&history(&values));
        let short = result.window(WindowLabel::Short).unwrap();
        assert_eq!(short.first_sequence_id, Some(41));
        assert_eq!(short.last_sequence_id, Some(50));
        assert_relative_eq!(short.mean, 14.5);
        let medium = result.window(WindowLabel::Medium).unwrap();
        assert_eq!(medium.sample_count, 50);
        assert_eq!(medium.confidence, 1.0);
    }

    #[test]
    fn test_interpretation_joins_windows() {
        let counts: Vec<f64> = (10..20).map(f64::from).collect();
        let text = analyzer().analyze(&history(&counts)).interpretation();
        assert!(text.starts_with("Short-term: Rising (+90.0%)"));
        assert!(text.contains(" | Medium-term:"));
    }
}
