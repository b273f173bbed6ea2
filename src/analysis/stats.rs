//! Numeric building blocks: running moments, percentiles, smoothing, trend fits.

use serde::{Deserialize, Serialize};

/// Floor applied to standard deviations and denominators.
pub const EPSILON: f64 = 1e-9;

/// Incremental mean/variance accumulator (Welford).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Z = (value - mean) / std_dev, with the deviation floored at `EPSILON`
    /// so a constant baseline yields a large finite score instead of a
    /// division by zero.
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev().max(EPSILON)
    }
}

/// Running component-wise mean of fixed-length vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningVector {
    count: u64,
    mean: Vec<f64>,
}

impl RunningVector {
    pub fn push(&mut self, values: &[f64]) {
        if self.mean.len() != values.len() {
            self.mean = vec![0.0; values.len()];
            self.count = 0;
        }
        self.count += 1;
        let n = self.count as f64;
        for (m, v) in self.mean.iter_mut().zip(values) {
            *m += (v - *m) / n;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<&[f64]> {
        if self.count == 0 {
            None
        } else {
            Some(&self.mean)
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Percentile `p` (0-100) of an ascending slice, linearly interpolated
/// between closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Exponential smoothing with a trend term (Holt). Level and trend share
/// `alpha`. The level starts at the first value and the trend at the first
/// difference, so a noiseless linear ramp is reproduced exactly while
/// isolated spikes are damped.
pub fn trend_smoothed(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return out;
    };
    let mut level = first;
    let mut trend = values.get(1).map(|&second| second - first).unwrap_or(0.0);
    out.push(level);

    for &x in &values[1..] {
        let previous = level;
        level = alpha * x + (1.0 - alpha) * (level + trend);
        trend = alpha * (level - previous) + (1.0 - alpha) * trend;
        out.push(level);
    }
    out
}

/// Ordinary least squares of `values` against their index. Returns
/// `(slope, intercept)`; fewer than two points give a flat line.
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    if n == 1 {
        return (0.0, values[0]);
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    let slope = num / den;
    (slope, y_mean - slope * x_mean)
}

/// Shannon diversity index (natural log) of a set of counts.
pub fn shannon_diversity<I>(counts: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let counts: Vec<f64> = counts.into_iter().filter(|&c| c > 0.0).collect();
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    -counts
        .iter()
        .map(|&c| {
            let p = c / total;
            p * p.ln()
        })
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_running_stats_match_two_pass() {
        let values = [12.0, 18.0, 17.0, 25.0, 9.0, 14.0, 18.0, 21.0];
        let mut rs = RunningStats::new();
        for v in values {
            rs.push(v);
        }
        assert_eq!(rs.count(), 8);
        assert_relative_eq!(rs.mean(), mean(&values), epsilon = 1e-12);
        assert_relative_eq!(rs.variance(), variance(&values), epsilon = 1e-9);
        assert_eq!(rs.min(), 9.0);
        assert_eq!(rs.max(), 25.0);
    }

    #[test]
    fn test_welford_is_stable_with_large_offset() {
        let mut rs = RunningStats::new();
        for v in [1e9 + 4.0, 1e9 + 7.0, 1e9 + 13.0, 1e9 + 16.0] {
            rs.push(v);
        }
        // Variance of 4, 7, 13, 16 is 22.5.
        assert_relative_eq!(rs.variance(), 22.5, epsilon = 1e-6);
    }

    #[test]
    fn test_z_score_constant_baseline_is_finite() {
        let mut rs = RunningStats::new();
        for _ in 0..10 {
            rs.push(18.0);
        }
        assert_eq!(rs.std_dev(), 0.0);
        assert_eq!(rs.z_score(18.0), 0.0);
        let z = rs.z_score(30.0);
        assert!(z.is_finite());
        assert!(z > 1e6);
    }

    #[test]
    fn test_stats() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(mean(&values), 3.0);
        // Variance of 1..5 is 2.0
        assert_relative_eq!(variance(&values), 2.0);
        let mut rs = RunningStats::new();
        values.iter().for_each(|&v| rs.push(v));
        // (10 - 3) / 1.414 ~ 4.95
        assert!(rs.z_score(10.0) > 4.9);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 50.0), 3.0);
        assert_eq!(percentile(&sorted, 100.0), 5.0);
        assert_relative_eq!(percentile(&sorted, 25.0), 2.0);
        assert_relative_eq!(percentile(&[10.0, 20.0], 75.0), 17.5);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_trend_smoothed_tracks_linear_ramp() {
        let ramp: Vec<f64> = (10..20).map(f64::from).collect();
        let smoothed = trend_smoothed(&ramp, 0.3);
        assert_eq!(smoothed.len(), ramp.len());
        for (s, r) in smoothed.iter().zip(&ramp) {
            assert_relative_eq!(s, r, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_trend_smoothed_damps_single_spike() {
        let values = [10.0, 10.0, 10.0, 40.0, 10.0, 10.0];
        let smoothed = trend_smoothed(&values, 0.3);
        assert!(smoothed[3] < 25.0);
        assert!(trend_smoothed(&[], 0.3).is_empty());
        assert_eq!(trend_smoothed(&[7.0], 0.3), vec![7.0]);
    }

    #[test]
    fn test_linear_fit() {
        let (slope, intercept) = linear_fit(&[1.0, 3.0, 5.0, 7.0]);
        assert_relative_eq!(slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(intercept, 1.0, epsilon = 1e-12);
        assert_eq!(linear_fit(&[4.0]), (0.0, 4.0));
        assert_eq!(linear_fit(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_shannon_diversity() {
        assert_eq!(shannon_diversity([5.0]), 0.0);
        assert_relative_eq!(shannon_diversity([1.0, 1.0]), 2f64.ln(), epsilon = 1e-12);
        assert_eq!(shannon_diversity(Vec::<f64>::new()), 0.0);
    }

    #[test]
    fn test_running_vector_mean() {
        let mut rv = RunningVector::default();
        assert!(rv.mean().is_none());
        rv.push(&[1.0, 10.0]);
        rv.push(&[3.0, 20.0]);
        assert_eq!(rv.count(), 2);
        assert_eq!(rv.mean().unwrap(), &[2.0, 15.0]);
    }
}
