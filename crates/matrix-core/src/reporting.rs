use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::result::{ExecutionResult, MatrixReport};

pub const REPORT_SCHEMA_VERSION: &str = "compat-matrix.report.v1";

/// Single entry in the persisted report (output is truncated).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryArtifact {
    pub dependency_version: String,
    pub bootstrap_variant: Option<String>,
    pub passed: bool,
    pub exit_code: i32,
    pub failure: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub output_tail: String,
}

/// Persisted matrix report written by `test-matrix --report`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub overall_passed: bool,
    pub passed: usize,
    pub failed: usize,
    pub entries: Vec<EntryArtifact>,
}

/// Lines of output kept per entry in the artifact.
const OUTPUT_TAIL_LINES: usize = 40;

impl ReportArtifact {
    pub fn from_report(report: &MatrixReport) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            overall_passed: report.overall_passed,
            passed: report.passed_count(),
            failed: report.failed_count(),
            entries: report.results.iter().map(entry_artifact).collect(),
        }
    }
}

fn entry_artifact(result: &ExecutionResult) -> EntryArtifact {
    EntryArtifact {
        dependency_version: result.spec.dependency_version.clone(),
        bootstrap_variant: result.spec.bootstrap_variant.clone(),
        passed: result.passed,
        exit_code: result.exit_code,
        failure: result.failure.map(|f| f.to_string()),
        attempts: result.attempts,
        duration_ms: result.duration_ms,
        output_tail: tail_lines(&result.output, OUTPUT_TAIL_LINES),
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &MatrixReport) -> Result<()> {
    let artifact = ReportArtifact::from_report(report);
    let content = serde_json::to_string_pretty(&artifact).context("serialize matrix report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// One line per entry plus an aggregate line.
pub fn render_summary(report: &MatrixReport) -> String {
    let mut out = String::new();
    for r in &report.results {
        let status = if r.passed { "PASS" } else { "FAIL" };
        out.push_str(&format!(
            "{:<24} {}  exit={:<4} {:>8}ms",
            r.spec.to_string(),
            status,
            r.exit_code,
            r.duration_ms
        ));
        if let Some(kind) = r.failure {
            out.push_str(&format!("  ({})", kind));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "matrix: {} ({} passed, {} failed of {})\n",
        if report.overall_passed { "PASSED" } else { "FAILED" },
        report.passed_count(),
        report.failed_count(),
        report.results.len()
    ));
    out
}
