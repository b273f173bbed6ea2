//! The analytics core: baseline modeling, temporal trends, fingerprints and
//! the per-cycle runner tying them to the detectors.
//!
//! Nothing in here performs I/O.

pub mod baseline;
pub mod fingerprint;
pub mod runner;
pub mod stats;
pub mod temporal;

pub use baseline::{BaselineModel, BaselineSnapshot, BaselineState, BaselineStatus};
pub use fingerprint::{Fingerprint, FingerprintComparison, FingerprintFeature, Fingerprinter};
pub use runner::{Analyzer, CycleReport};
pub use temporal::{TemporalAnalysis, TemporalAnalyzer, TrendDirection, WindowLabel, WindowResult};
