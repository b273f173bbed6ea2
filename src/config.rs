//! TOML configuration for ambientwatch.
//!
//! Layered model: an explicit path, then the `AMBIENTWATCH_CONFIG`
//! environment variable, then the standard system location, then compiled-in
//! defaults. Every section falls back to its defaults field by field, and
//! `Config::validate` rejects out-of-range values before any cycle runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::fingerprint::FingerprintFeature;
use crate::error::ConfigError;
use crate::observation;

pub const CONFIG_ENV: &str = "AMBIENTWATCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ambientwatch/ambientwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub temporal: TemporalConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. `explicit`, when given (errors are returned, not skipped).
    /// 2. The path in `AMBIENTWATCH_CONFIG`.
    /// 3. `/etc/ambientwatch/ambientwatch.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "AMBIENTWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            return Self::load(system_path);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Check every threshold and window against its valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.baseline.validate()?;
        self.temporal.validate()?;
        self.anomaly.validate()?;
        self.status.validate()?;
        self.fingerprint.validate()?;
        self.monitor.validate()?;
        Ok(())
    }
}

fn require_positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::new(key, format!("must be positive, got {}", value)))
    }
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Observations required before the baseline is considered stable.
    pub min_observations: u64,
    /// Observations required before the baseline is used at all.
    pub provisional_observations: u64,
    /// Fold queued observations into the baseline every N observations.
    pub update_interval: usize,
    /// Allowed excess of recent over historical variance (as a fraction)
    /// before confidence is reduced.
    pub stability_threshold: f64,
    /// Trailing window (observations) used as "recent" for stability.
    pub rolling_window: usize,
    /// Retained values per feature for percentile estimation.
    pub percentile_window: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_observations: 100,
            provisional_observations: 10,
            update_interval: 10,
            stability_threshold: 0.5,
            rolling_window: 50,
            percentile_window: 500,
        }
    }
}

impl BaselineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_observations == 0 {
            return Err(ConfigError::new(
                "baseline.min_observations",
                "must be positive",
            ));
        }
        if self.provisional_observations == 0
            || self.provisional_observations > self.min_observations
        {
            return Err(ConfigError::new(
                "baseline.provisional_observations",
                format!(
                    "must be between 1 and min_observations ({})",
                    self.min_observations
                ),
            ));
        }
        if self.update_interval == 0 {
            return Err(ConfigError::new(
                "baseline.update_interval",
                "must be positive",
            ));
        }
        if !(self.stability_threshold.is_finite() && self.stability_threshold >= 0.0) {
            return Err(ConfigError::new(
                "baseline.stability_threshold",
                "must be a non-negative number",
            ));
        }
        if self.rolling_window < 2 {
            return Err(ConfigError::new(
                "baseline.rolling_window",
                "must be at least 2",
            ));
        }
        if self.percentile_window < self.rolling_window {
            return Err(ConfigError::new(
                "baseline.percentile_window",
                "must not be smaller than rolling_window",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Temporal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSizes {
    pub short: usize,
    pub medium: usize,
    pub long: usize,
}

impl Default for WindowSizes {
    fn default() -> Self {
        Self {
            short: 10,
            medium: 50,
            long: 200,
        }
    }
}

impl WindowSizes {
    pub fn largest(&self) -> usize {
        self.short.max(self.medium).max(self.long)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Level and trend smoothing factor, in (0, 1].
    pub smoothing_factor: f64,
    /// Relative change across a window that counts as a trend.
    pub change_threshold: f64,
    /// Scalar feature analyzed for trends.
    pub feature: String,
    pub windows: WindowSizes,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.3,
            change_threshold: 0.10,
            feature: observation::PRIMARY_FEATURE.to_string(),
            windows: WindowSizes::default(),
        }
    }
}

impl TemporalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.windows;
        if w.short == 0 || w.medium == 0 || w.long == 0 {
            return Err(ConfigError::new(
                "temporal.windows",
                "window sizes must be positive",
            ));
        }
        if !(w.short <= w.medium && w.medium <= w.long) {
            return Err(ConfigError::new(
                "temporal.windows",
                "windows must be ordered short <= medium <= long",
            ));
        }
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(ConfigError::new(
                "temporal.smoothing_factor",
                format!("must be in (0, 1], got {}", self.smoothing_factor),
            ));
        }
        require_positive("temporal.change_threshold", self.change_threshold)?;
        if self.feature.is_empty() {
            return Err(ConfigError::new("temporal.feature", "must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Anomaly
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    #[default]
    Zscore,
    Iqr,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZScoreThreshold {
    pub high: f64,
    pub medium: f64,
}

impl Default for ZScoreThreshold {
    fn default() -> Self {
        Self {
            high: 3.0,
            medium: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub method: DetectionMethod,
    pub iqr_multiplier: f64,
    /// Relative change versus the previous observation that counts as a
    /// spike or drop.
    pub sudden_change_threshold: f64,
    /// Minimum absolute change for a spike or drop; 0 disables the check.
    pub sudden_change_min_delta: f64,
    /// Coefficient of variation of signal quality that counts as unstable.
    pub instability_threshold: f64,
    /// Total-variation distance between channel distributions.
    pub channel_shift_threshold: f64,
    pub zscore_threshold: ZScoreThreshold,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            method: DetectionMethod::Zscore,
            iqr_multiplier: 1.5,
            sudden_change_threshold: 0.5,
            sudden_change_min_delta: 0.0,
            instability_threshold: 2.0,
            channel_shift_threshold: 0.35,
            zscore_threshold: ZScoreThreshold::default(),
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("anomaly.zscore_threshold.high", self.zscore_threshold.high)?;
        require_positive(
            "anomaly.zscore_threshold.medium",
            self.zscore_threshold.medium,
        )?;
        if self.zscore_threshold.medium >= self.zscore_threshold.high {
            return Err(ConfigError::new(
                "anomaly.zscore_threshold",
                "medium must be below high",
            ));
        }
        require_positive("anomaly.iqr_multiplier", self.iqr_multiplier)?;
        require_positive(
            "anomaly.sudden_change_threshold",
            self.sudden_change_threshold,
        )?;
        if !(self.sudden_change_min_delta.is_finite() && self.sudden_change_min_delta >= 0.0) {
            return Err(ConfigError::new(
                "anomaly.sudden_change_min_delta",
                "must be a non-negative number",
            ));
        }
        require_positive("anomaly.instability_threshold", self.instability_threshold)?;
        if !(self.channel_shift_threshold > 0.0 && self.channel_shift_threshold <= 1.0) {
            return Err(ConfigError::new(
                "anomaly.channel_shift_threshold",
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Deviation bands (in z units of the primary feature) used by the
/// environmental status table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub normal_band: f64,
    pub anomalous_band: f64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            normal_band: 1.0,
            anomalous_band: 2.0,
        }
    }
}

impl StatusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("status.normal_band", self.normal_band)?;
        if self.anomalous_band <= self.normal_band {
            return Err(ConfigError::new(
                "status.anomalous_band",
                "must be above normal_band",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub features: Vec<FingerprintFeature>,
    pub similarity_threshold: f64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            features: FingerprintFeature::ALL.to_vec(),
            similarity_threshold: 0.85,
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.features.is_empty() {
            return Err(ConfigError::new(
                "fingerprint.features",
                "at least one feature must be selected",
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::new(
                "fingerprint.similarity_threshold",
                "must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Monitor loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Wireless interface scanned by the `iw` collector.
    pub interface: String,
    /// Seconds between monitoring cycles.
    pub interval_secs: u64,
    /// Path to the `iw` binary.
    pub iw_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            interval_secs: 60,
            iw_path: "/usr/sbin/iw".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::new(
                "monitor.interval_secs",
                "must be positive",
            ));
        }
        if self.interface.is_empty() {
            return Err(ConfigError::new("monitor.interface", "must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage / API / Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/ambientwatch.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());

        assert_eq!(cfg.baseline.min_observations, 100);
        assert_eq!(cfg.baseline.update_interval, 10);
        assert_eq!(cfg.temporal.windows, WindowSizes { short: 10, medium: 50, long: 200 });
        assert_eq!(cfg.temporal.smoothing_factor, 0.3);
        assert_eq!(cfg.anomaly.method, DetectionMethod::Zscore);
        assert_eq!(cfg.anomaly.zscore_threshold.high, 3.0);
        assert_eq!(cfg.anomaly.zscore_threshold.medium, 2.0);
        assert_eq!(cfg.anomaly.sudden_change_threshold, 0.5);
        assert_eq!(cfg.anomaly.instability_threshold, 2.0);
        assert_eq!(cfg.fingerprint.features.len(), 6);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[baseline]
min_observations = 50
update_interval = 5
stability_threshold = 0.25

[temporal]
windows = { short = 5, medium = 20, long = 100 }
smoothing_factor = 0.5
change_threshold = 0.2

[anomaly]
method = "iqr"
zscore_threshold = { high = 4.0, medium = 2.5 }
iqr_multiplier = 3.0
sudden_change_threshold = 0.75

[fingerprint]
features = ["bssid_count", "signal_mean"]
similarity_threshold = 0.9

[monitor]
interface = "wlp2s0"
interval_secs = 30

[logging]
level = "debug"
json = true
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(cfg.validate().is_ok());

        assert_eq!(cfg.baseline.min_observations, 50);
        assert_eq!(cfg.baseline.update_interval, 5);
        // Unset field keeps its default.
        assert_eq!(cfg.baseline.provisional_observations, 10);
        assert_eq!(cfg.temporal.windows.short, 5);
        assert_eq!(cfg.temporal.windows.long, 100);
        assert_eq!(cfg.anomaly.method, DetectionMethod::Iqr);
        assert_eq!(cfg.anomaly.zscore_threshold.high, 4.0);
        assert_eq!(cfg.anomaly.iqr_multiplier, 3.0);
        assert_eq!(
            cfg.fingerprint.features,
            vec![FingerprintFeature::BssidCount, FingerprintFeature::SignalMean]
        );
        assert_eq!(cfg.monitor.interface, "wlp2s0");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_rejects_non_positive_window() {
        let mut cfg = Config::default();
        cfg.temporal.windows.short = 0;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.key, "temporal.windows");
    }

    #[test]
    fn test_rejects_unordered_windows() {
        let mut cfg = Config::default();
        cfg.temporal.windows.medium = 500;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_zscore_thresholds() {
        let mut cfg = Config::default();
        cfg.anomaly.zscore_threshold = ZScoreThreshold { high: 2.0, medium: 3.0 };
        assert_eq!(cfg.validate().unwrap_err().key, "anomaly.zscore_threshold");
    }

    #[test]
    fn test_rejects_bad_smoothing_and_bands() {
        let mut cfg = Config::default();
        cfg.temporal.smoothing_factor = 1.5;
        assert_eq!(cfg.validate().unwrap_err().key, "temporal.smoothing_factor");

        let mut cfg = Config::default();
        cfg.status.anomalous_band = 0.5;
        assert_eq!(cfg.validate().unwrap_err().key, "status.anomalous_band");

        let mut cfg = Config::default();
        cfg.baseline.provisional_observations = 500;
        assert_eq!(
            cfg.validate().unwrap_err().key,
            "baseline.provisional_observations"
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ambientwatch.toml");
        std::fs::write(
            &path,
            r#"
[monitor]
interval_secs = 15
"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.monitor.interval_secs, 15);
    }

    #[test]
    fn test_load_invalid_values_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[baseline]\nupdate_interval = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/ambientwatch.toml")).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg, back);
    }
}
