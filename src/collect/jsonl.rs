//! Observations recorded as JSON lines, one object per line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::observation::Observation;

pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every observation in the file. Blank lines are ignored; a line
    /// that does not parse is an error naming its line number.
    pub fn read_all(&self) -> Result<Vec<Observation>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        parse_json_lines(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }
}

pub fn parse_json_lines(content: &str) -> Result<Vec<Observation>> {
    let mut observations = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let obs: Observation = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid observation", i + 1))?;
        observations.push(obs);
    }
    if observations.windows(2).any(|w| w[1].sequence_id <= w[0].sequence_id) {
        warn!("observations are not in ascending sequence order");
    }
    Ok(observations)
}
