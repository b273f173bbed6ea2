//! Environmental fingerprints: a compact, reproducible summary of what the
//! radio environment looks like, plus similarity scoring between two of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::analysis::stats::{shannon_diversity, EPSILON};
use crate::config::FingerprintConfig;
use crate::observation::{self, Observation};

/// Features a fingerprint can be built from, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintFeature {
    BssidCount,
    SsidCount,
    SignalMean,
    SignalStd,
    ChannelDiversity,
    SignalStability,
}

impl FingerprintFeature {
    pub const ALL: [FingerprintFeature; 6] = [
        FingerprintFeature::BssidCount,
        FingerprintFeature::SsidCount,
        FingerprintFeature::SignalMean,
        FingerprintFeature::SignalStd,
        FingerprintFeature::ChannelDiversity,
        FingerprintFeature::SignalStability,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FingerprintFeature::BssidCount => "bssid_count",
            FingerprintFeature::SsidCount => "ssid_count",
            FingerprintFeature::SignalMean => "signal_mean",
            FingerprintFeature::SignalStd => "signal_std",
            FingerprintFeature::ChannelDiversity => "channel_diversity",
            FingerprintFeature::SignalStability => "signal_stability",
        }
    }

    /// Quantization step used before hashing.
    pub fn bucket_width(self) -> f64 {
        match self {
            FingerprintFeature::BssidCount | FingerprintFeature::SsidCount => 2.0,
            FingerprintFeature::SignalMean => 5.0,
            FingerprintFeature::SignalStd => 2.5,
            FingerprintFeature::ChannelDiversity | FingerprintFeature::SignalStability => 0.1,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Value of this feature for one observation. Missing inputs read as 0.
    pub fn extract(self, obs: &Observation) -> f64 {
        match self {
            FingerprintFeature::BssidCount => obs.numeric(observation::BSSID_COUNT).unwrap_or(0.0),
            FingerprintFeature::SsidCount => obs.numeric(observation::SSID_COUNT).unwrap_or(0.0),
            FingerprintFeature::SignalMean => obs.numeric(observation::SIGNAL_MEAN).unwrap_or(0.0),
            FingerprintFeature::SignalStd => obs.numeric(observation::SIGNAL_STD).unwrap_or(0.0),
            FingerprintFeature::ChannelDiversity => {
                shannon_diversity(obs.channels().values().map(|&c| f64::from(c)))
            }
            FingerprintFeature::SignalStability => {
                let mean = obs.numeric(observation::SIGNAL_MEAN).unwrap_or(0.0);
                let std = obs.numeric(observation::SIGNAL_STD).unwrap_or(0.0);
                if mean <= EPSILON {
                    0.0
                } else {
                    (1.0 - std / mean).clamp(0.0, 1.0)
                }
            }
        }
    }
}

/// Canonical six-feature vector of an observation.
pub fn canonical_vector(obs: &Observation) -> Vec<f64> {
    FingerprintFeature::ALL.iter().map(|f| f.extract(obs)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub features: Vec<FingerprintFeature>,
    pub feature_vector: Vec<f64>,
    pub hash: String,
    pub observation_count: u64,
}

impl Fingerprint {
    pub fn value(&self, feature: FingerprintFeature) -> Option<f64> {
        self.features
            .iter()
            .position(|&f| f == feature)
            .map(|i| self.feature_vector[i])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintComparison {
    pub similarity: f64,
    pub is_match: bool,
    pub hash_match: bool,
    pub feature_similarities: BTreeMap<String, f64>,
}

impl FingerprintComparison {
    pub fn interpretation(&self) -> String {
        let pct = self.similarity * 100.0;
        if self.is_match {
            format!("Environments match (similarity: {:.1}%)", pct)
        } else if self.similarity > 0.70 {
            format!("Environments similar but distinct (similarity: {:.1}%)", pct)
        } else if self.similarity > 0.50 {
            format!("Environments moderately different (similarity: {:.1}%)", pct)
        } else {
            format!("Environments significantly different (similarity: {:.1}%)", pct)
        }
    }
}

/// Builds and compares fingerprints over a fixed feature subset.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    features: Vec<FingerprintFeature>,
    similarity_threshold: f64,
}

impl Fingerprinter {
    pub fn new(config: &FingerprintConfig) -> Self {
        let mut features = config.features.clone();
        features.sort();
        features.dedup();
        Self {
            features,
            similarity_threshold: config.similarity_threshold,
        }
    }

    pub fn features(&self) -> &[FingerprintFeature] {
        &self.features
    }

    pub fn compute(&self, obs: &Observation) -> Fingerprint {
        let vector = self.features.iter().map(|f| f.extract(obs)).collect();
        self.build(vector, 1)
    }

    /// Fingerprint from a full canonical vector (e.g. the baseline's running
    /// mean). `None` when the vector is not canonical length.
    pub fn from_canonical(&self, canonical: &[f64], observation_count: u64) -> Option<Fingerprint> {
        if canonical.len() != FingerprintFeature::ALL.len() {
            return None;
        }
        let vector = self.features.iter().map(|f| canonical[f.index()]).collect();
        Some(self.build(vector, observation_count))
    }

    /// Component-wise mean of several fingerprints, rehashed.
    pub fn aggregate(&self, fingerprints: &[Fingerprint]) -> Option<Fingerprint> {
        if fingerprints.is_empty() {
            return None;
        }
        let mut vector = Vec::with_capacity(self.features.len());
        for &feature in &self.features {
            let values: Vec<f64> = fingerprints.iter().filter_map(|fp| fp.value(feature)).collect();
            if values.is_empty() {
                vector.push(0.0);
            } else {
                vector.push(values.iter().sum::<f64>() / values.len() as f64);
            }
        }
        let count = fingerprints.iter().map(|fp| fp.observation_count).sum();
        Some(self.build(vector, count))
    }

    pub fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> FingerprintComparison {
        let mut feature_similarities = BTreeMap::new();
        for (i, &feature) in a.features.iter().enumerate() {
            if let Some(other) = b.value(feature) {
                feature_similarities.insert(
                    feature.name().to_string(),
                    value_similarity(a.feature_vector[i], other),
                );
            }
        }

        let similarity = if feature_similarities.is_empty() {
            0.0
        } else {
            feature_similarities.values().sum::<f64>() / feature_similarities.len() as f64
        };

        FingerprintComparison {
            similarity,
            is_match: similarity >= self.similarity_threshold,
            hash_match: a.hash == b.hash,
            feature_similarities,
        }
    }

    fn build(&self, feature_vector: Vec<f64>, observation_count: u64) -> Fingerprint {
        let hash = quantized_hash(&self.features, &feature_vector);
        Fingerprint {
            features: self.features.clone(),
            feature_vector,
            hash,
            observation_count,
        }
    }
}

/// 1 - |a - b| / max(|a|, |b|), or 1 when both are zero.
fn value_similarity(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale < EPSILON {
        return 1.0;
    }
    (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
}

fn quantized_hash(features: &[FingerprintFeature], vector: &[f64]) -> String {
    let mut data = Vec::with_capacity(features.len() * 9);
    for (feature, value) in features.iter().zip(vector) {
        let bucket = (value / feature.bucket_width()).round() as i64;
        data.push(feature.index() as u8);
        data.extend_from_slice(&bucket.to_be_bytes());
    }
    format!("{:08x}", xxh64(&data, 0) as u32)
}
