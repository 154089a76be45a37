//! JSON exporter for experiment reports.
//!
//! Exports a single scenario run for offline inspection.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use chaos_core::ExperimentReport;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct ReportExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,

    /// Engine report, absent when setup failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ExperimentReport>,
}

impl ReportExport {
    /// Builds the export for a finished run.
    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            metrics: result.metrics.clone(),
            report: result.report.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
