//! Observation data model -- one immutable snapshot of the wireless environment.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// Number of distinct access points (signal sources). The primary feature.
pub const BSSID_COUNT: &str = "bssid_count";
/// Number of distinct named networks.
pub const SSID_COUNT: &str = "ssid_count";
/// Mean signal quality across access points, percent 0-100.
pub const SIGNAL_MEAN: &str = "signal_mean";
/// Standard deviation of signal quality, percent points.
pub const SIGNAL_STD: &str = "signal_std";
/// Channel number -> access point count.
pub const CHANNELS: &str = "channels";
/// Band carrying most access points ("2.4GHz", "5GHz", "6GHz").
pub const DOMINANT_BAND: &str = "dominant_band";

pub const PRIMARY_FEATURE: &str = BSSID_COUNT;

pub const REQUIRED_FEATURES: [&str; 4] = [BSSID_COUNT, SSID_COUNT, SIGNAL_MEAN, SIGNAL_STD];

pub type ChannelHistogram = BTreeMap<u16, u32>;

/// A single feature value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(String),
    Histogram(ChannelHistogram),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

// Hand-written so histogram keys arrive as JSON strings ("6": 3) and still
// parse as channel numbers; a derived untagged enum buffers them as strings.
impl<'de> Deserialize<'de> for FeatureValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FeatureValueVisitor;

        impl<'de> Visitor<'de> for FeatureValueVisitor {
            type Value = FeatureValue;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a number, a string or a channel histogram")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(FeatureValue::Numeric(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(FeatureValue::Numeric(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(FeatureValue::Numeric(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(FeatureValue::Categorical(v.to_string()))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut histogram = ChannelHistogram::new();
                while let Some((key, count)) = map.next_entry::<String, u32>()? {
                    let channel = key
                        .parse::<u16>()
                        .map_err(|_| de::Error::custom(format!("invalid channel '{}'", key)))?;
                    histogram.insert(channel, count);
                }
                Ok(FeatureValue::Histogram(histogram))
            }
        }

        deserializer.deserialize_any(FeatureValueVisitor)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Numeric(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Categorical(v.to_string())
    }
}

impl From<ChannelHistogram> for FeatureValue {
    fn from(v: ChannelHistogram) -> Self {
        FeatureValue::Histogram(v)
    }
}

/// One timestamped snapshot. Never mutated after construction; the builder
/// methods consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sequence_id: u64,
    pub timestamp: DateTime<Utc>,
    pub features: BTreeMap<String, FeatureValue>,
}

impl Observation {
    pub fn new(sequence_id: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            sequence_id,
            timestamp,
            features: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, name: &str, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.to_string(), value.into());
        self
    }

    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.features.get(name).and_then(FeatureValue::as_f64)
    }

    pub fn categorical(&self, name: &str) -> Option<&str> {
        match self.features.get(name) {
            Some(FeatureValue::Categorical(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The channel histogram, empty when the feature is absent.
    pub fn channels(&self) -> ChannelHistogram {
        match self.features.get(CHANNELS) {
            Some(FeatureValue::Histogram(h)) => h.clone(),
            _ => ChannelHistogram::new(),
        }
    }

    /// Numeric features in name order.
    pub fn numeric_features(&self) -> impl Iterator<Item = (&str, f64)> {
        self.features
            .iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.as_str(), v)))
    }

    /// Check required features are present, numeric and finite, and that
    /// counts are non-negative.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for feature in REQUIRED_FEATURES {
            match self.features.get(feature) {
                None => {
                    return Err(ValidationError::MissingFeature {
                        sequence_id: self.sequence_id,
                        feature: feature.to_string(),
                    })
                }
                Some(FeatureValue::Numeric(_)) => {}
                Some(_) => {
                    return Err(ValidationError::NotNumeric {
                        sequence_id: self.sequence_id,
                        feature: feature.to_string(),
                    })
                }
            }
        }

        for (name, value) in self.numeric_features() {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite {
                    sequence_id: self.sequence_id,
                    feature: name.to_string(),
                });
            }
            if is_count_feature(name) && value < 0.0 {
                return Err(ValidationError::NegativeCount {
                    sequence_id: self.sequence_id,
                    feature: name.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }
}

pub fn is_count_feature(name: &str) -> bool {
    name.ends_with("_count")
}
