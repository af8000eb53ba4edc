//! Per-entry results and the aggregate matrix report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::version_spec::VersionSpec;

/// Exit code recorded when an entry exceeds its wall-clock budget.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code recorded when the environment could not be created at all.
pub const EXIT_PROVISIONING: i32 = 125;

/// Exit code recorded when the contained run crashed or was killed.
pub const EXIT_CRASHED: i32 = -1;

/// Why an entry did not pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Container setup or dependency fetch failed.
    Provisioning,
    /// The contained test suite exited non-zero.
    TestFailure,
    /// The entry exceeded its timeout.
    Timeout,
    /// The contained run panicked or was killed.
    Crashed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Provisioning => "provisioning",
            FailureKind::TestFailure => "test_failure",
            FailureKind::Timeout => "timeout",
            FailureKind::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one matrix entry. Not mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Entry this result belongs to.
    pub spec: VersionSpec,

    /// Exit code of the failing step, or of the test suite.
    pub exit_code: i32,

    /// Whether the entry passed.
    pub passed: bool,

    /// Combined output of every step that ran.
    pub output: String,

    /// Failure classification (`None` when passed).
    pub failure: Option<FailureKind>,

    /// Attempts spent on the step that decided the outcome.
    pub attempts: u32,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Build a result from a test-suite exit code.
    pub fn from_exit_code(spec: VersionSpec, exit_code: i32, output: String) -> Self {
        let failure = (exit_code != 0).then_some(FailureKind::TestFailure);
        Self {
            spec,
            exit_code,
            passed: failure.is_none(),
            output,
            failure,
            attempts: 1,
            duration_ms: 0,
        }
    }

    /// Build a failed result. A zero exit code is coerced to a non-zero one.
    pub fn failed(spec: VersionSpec, kind: FailureKind, exit_code: i32, output: String) -> Self {
        let exit_code = match (exit_code, kind) {
            (0, FailureKind::Timeout) => EXIT_TIMEOUT,
            (0, FailureKind::Crashed) => EXIT_CRASHED,
            (0, _) => EXIT_PROVISIONING,
            (code, _) => code,
        };
        Self {
            spec,
            exit_code,
            passed: false,
            output,
            failure: Some(kind),
            attempts: 1,
            duration_ms: 0,
        }
    }

    pub fn provisioning(spec: VersionSpec, exit_code: i32, output: String) -> Self {
        Self::failed(spec, FailureKind::Provisioning, exit_code, output)
    }

    pub fn timed_out(spec: VersionSpec, limit_secs: u64) -> Self {
        Self::failed(
            spec,
            FailureKind::Timeout,
            EXIT_TIMEOUT,
            format!("entry exceeded its {limit_secs}s timeout"),
        )
    }

    pub fn crashed(spec: VersionSpec, reason: String) -> Self {
        Self::failed(spec, FailureKind::Crashed, EXIT_CRASHED, reason)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// The entry's dependency version.
    pub fn version(&self) -> &str {
        &self.spec.dependency_version
    }
}

/// Ordered results of a matrix run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixReport {
    pub results: Vec<ExecutionResult>,
    pub overall_passed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MatrixReport {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            overall_passed: true,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append an entry result, keeping `overall_passed` current.
    pub fn push(&mut self, result: ExecutionResult) {
        self.overall_passed &= result.passed;
        self.results.push(result);
    }

    /// Stamp the finish time and recompute the aggregate.
    pub fn finalize(mut self) -> Self {
        self.overall_passed = self.results.iter().all(|r| r.passed);
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    /// Look up the result for a dependency version.
    pub fn get(&self, version: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.version() == version)
    }
}

impl Default for MatrixReport {
    fn default() -> Self {
        Self::new()
    }
}
