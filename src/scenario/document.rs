//! Loading and saving scenario documents
//!
//! Scenarios are stored as YAML or JSON. The format is picked from the
//! file extension, defaulting to YAML.

use std::path::Path;

use super::evaluator::EvaluatorKind;
use super::runner::Scenario;
use crate::common::{Error, Result};

/// On-disk encoding of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Guess the format from a path's extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Json => write!(f, "json"),
            Format::Yaml => write!(f, "yaml"),
        }
    }
}

impl Scenario {
    /// Read a scenario from a YAML or JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let scenario = Self::parse(&content, Format::from_path(path))?;
        tracing::debug!(
            path = %path.display(),
            cases = scenario.cases().len(),
            "Loaded scenario"
        );
        Ok(scenario)
    }

    pub fn parse(content: &str, format: Format) -> Result<Self> {
        match format {
            Format::Json => Ok(serde_json::from_str(content)?),
            Format::Yaml => Ok(serde_yaml::from_str(content)?),
        }
    }

    /// Encode the scenario; the cache is never written
    pub fn encode(&self, format: Format) -> Result<String> {
        match format {
            Format::Json => Ok(serde_json::to_string_pretty(self)?),
            Format::Yaml => Ok(serde_yaml::to_string(self)?),
        }
    }

    /// Expression representations used across all cases, in first-seen order
    ///
    /// More than one entry means no single evaluator can run every case.
    pub fn expression_kinds(&self) -> Vec<EvaluatorKind> {
        let mut kinds = Vec::new();
        for expression in self.cases().iter().flat_map(|c| &c.expect.evaluate) {
            let kind = expression.kind();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}
