//! compat-matrix core library
//!
//! Runs a library's test suite against a matrix of native-dependency
//! versions, one disposable container per version, while a designated
//! source line is patched for the duration of each run and restored
//! byte-for-byte afterwards.
//!
//! - [`matrix`]: validated list of [`VersionSpec`] entries
//! - [`patch`]: [`SourcePatcher`] and the reverting [`PatchGuard`]
//! - [`runner`]: the [`ContainerRunner`] backend trait
//! - [`orchestrator`]: sequential and parallel matrix drivers
//! - [`config`], [`reporting`], [`telemetry`]: ambient plumbing

pub mod config;
pub mod domain;
pub mod execution;
pub mod fakes;
pub mod matrix;
pub mod orchestrator;
pub mod patch;
pub mod reporting;
pub mod runner;
pub mod telemetry;
pub mod workspace;

pub use config::{ContainerSettings, MatrixConfig, CONFIG_ENV, RUNTIME_ENV};
pub use domain::{
    ConfigurationError, ExecutionResult, FailureKind, MatrixError, MatrixReport, PatchError,
    Result, VersionSpec, EXIT_CRASHED, EXIT_PROVISIONING, EXIT_TIMEOUT,
};
pub use execution::{retry_with_backoff, ExecutionControls, RetryPolicy};
pub use matrix::VersionMatrix;
pub use orchestrator::Orchestrator;
pub use patch::{LineMatcher, MatchLine, MatcherSpec, PatchGuard, PatchRule, PatchState, SourcePatcher};
pub use reporting::{render_summary, write_report_json, ReportArtifact};
pub use runner::ContainerRunner;
pub use telemetry::init_tracing;
pub use workspace::PrivateWorkspace;
