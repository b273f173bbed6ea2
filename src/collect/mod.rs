//! Acquisition: turn a wireless scan into an aggregate `Observation`.
//!
//! Only counts and signal statistics leave this module. BSSIDs and SSIDs are
//! used to count distinct sources and are then dropped.

pub mod jsonl;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::observation::{self, ChannelHistogram, Observation};

pub use jsonl::JsonLinesSource;

/// Source of observations for the monitoring loop.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Take one snapshot and label it with `sequence_id`.
    async fn collect(&self, sequence_id: u64) -> Result<Observation>;

    fn name(&self) -> &str;
}

/// Scans with `iw dev <interface> scan`.
pub struct IwScanCollector {
    iw_path: String,
    interface: String,
    timeout: Duration,
}

impl IwScanCollector {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            iw_path: config.iw_path.clone(),
            interface: config.interface.clone(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait::async_trait]
impl Collector for IwScanCollector {
    async fn collect(&self, sequence_id: u64) -> Result<Observation> {
        let command = format!("{} dev {} scan", self.iw_path, self.interface);
        debug!(%command, "running scan");

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.iw_path)
                .arg("dev")
                .arg(&self.interface)
                .arg("scan")
                .output(),
        )
        .await
        .with_context(|| format!("'{}' timed out after {:?}", command, self.timeout))?
        .with_context(|| format!("Failed to execute '{}'", command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("'{}' failed: {}", command, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let obs = normalize_iw_scan(&stdout, sequence_id, Utc::now());
        info!(
            sequence_id,
            bssid_count = obs.numeric(observation::BSSID_COUNT).unwrap_or(0.0),
            "scan collected"
        );
        Ok(obs)
    }

    fn name(&self) -> &str {
        "iw"
    }
}

/// Signal quality in percent from dBm: -100 dBm or weaker is 0, -50 dBm or
/// stronger is 100.
pub fn dbm_to_percent(dbm: f64) -> f64 {
    (2.0 * (dbm + 100.0)).clamp(0.0, 100.0)
}

/// Channel number for a centre frequency in MHz.
pub fn frequency_to_channel(mhz: u32) -> Option<u16> {
    let channel = match mhz {
        2484 => 14,
        2412..=2472 => (mhz - 2407) / 5,
        5005..=5920 => (mhz - 5000) / 5,
        5955..=7115 => (mhz - 5950) / 5,
        _ => return None,
    };
    u16::try_from(channel).ok()
}

pub fn frequency_band(mhz: u32) -> Option<&'static str> {
    match mhz {
        2400..=2500 => Some("2.4GHz"),
        5000..=5924 => Some("5GHz"),
        5925..=7125 => Some("6GHz"),
        _ => None,
    }
}

#[derive(Default)]
struct Bss {
    bssid: String,
    ssid: Option<String>,
    freq: Option<u32>,
    signal_dbm: Option<f64>,
}

/// Parse `iw dev <if> scan` output into an aggregate observation.
pub fn normalize_iw_scan(text: &str, sequence_id: u64, timestamp: DateTime<Utc>) -> Observation {
    let mut entries: Vec<Bss> = Vec::new();

    for raw in text.lines() {
        // "BSS 00:11:22:33:44:55(on wlan0) -- associated"
        if let Some(rest) = raw.strip_prefix("BSS ") {
            let bssid: String = rest
                .chars()
                .take_while(|c| c.is_ascii_hexdigit() || *c == ':')
                .collect();
            entries.push(Bss {
                bssid: bssid.to_ascii_lowercase(),
                ..Bss::default()
            });
            continue;
        }

        let Some(current) = entries.last_mut() else {
            continue;
        };
        let line = raw.trim();
        if let Some(freq) = line.strip_prefix("freq: ") {
            // Newer iw prints "2437.0"
            if let Ok(f) = freq.trim().parse::<f64>() {
                current.freq = Some(f.round() as u32);
            }
        } else if let Some(signal) = line.strip_prefix("signal: ") {
            // "-52.00 dBm"
            let val = signal.trim_end_matches("dBm").trim();
            if let Ok(s) = val.parse::<f64>() {
                current.signal_dbm = Some(s);
            }
        } else if let Some(ssid) = line.strip_prefix("SSID:") {
            let ssid = ssid.trim();
            if !ssid.is_empty() && current.ssid.is_none() {
                current.ssid = Some(ssid.to_string());
            }
        }
    }

    let bssids: HashSet<&str> = entries.iter().map(|b| b.bssid.as_str()).collect();
    let ssids: HashSet<&str> = entries.iter().filter_map(|b| b.ssid.as_deref()).collect();

    let signals: Vec<f64> = entries
        .iter()
        .filter_map(|b| b.signal_dbm)
        .map(dbm_to_percent)
        .collect();
    let signal_mean = crate::analysis::stats::mean(&signals);
    let signal_std = crate::analysis::stats::std_dev(&signals);

    let mut channels = ChannelHistogram::new();
    let mut bands: BTreeMap<&str, u32> = BTreeMap::new();
    for freq in entries.iter().filter_map(|b| b.freq) {
        if let Some(ch) = frequency_to_channel(freq) {
            *channels.entry(ch).or_insert(0) += 1;
        }
        if let Some(band) = frequency_band(freq) {
            *bands.entry(band).or_insert(0) += 1;
        }
    }
    // Ties go to the lower band.
    let dominant_band = ["2.4GHz", "5GHz", "6GHz"]
        .into_iter()
        .filter_map(|b| bands.get(b).map(|&n| (b, n)))
        .fold(None, |best: Option<(&str, u32)>, (b, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((b, n)),
        })
        .map_or("none", |(b, _)| b);

    Observation::new(sequence_id, timestamp)
        .with_feature(observation::BSSID_COUNT, bssids.len() as f64)
        .with_feature(observation::SSID_COUNT, ssids.len() as f64)
        .with_feature(observation::SIGNAL_MEAN, signal_mean)
        .with_feature(observation::SIGNAL_STD, signal_std)
        .with_feature(observation::CHANNELS, channels)
        .with_feature(observation::DOMINANT_BAND, dominant_band)
}
