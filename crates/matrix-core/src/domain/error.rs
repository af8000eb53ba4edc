//! Error taxonomy for matrix orchestration.
//!
//! Entry-local problems (provisioning, failing tests) are never errors: they
//! are folded into an [`ExecutionResult`](super::result::ExecutionResult).
//! Only configuration problems and patch problems surface as `Err`.

use std::path::PathBuf;

/// Malformed matrix or configuration. Raised before any entry executes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("matrix entry {index} has an empty dependency version")]
    EmptyVersion { index: usize },

    #[error("duplicate dependency version in matrix: {version}")]
    DuplicateVersion { version: String },

    #[error("version {version} is not part of the matrix (known: {known})")]
    UnknownVersion { version: String, known: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The designated source file could not be patched or restored.
///
/// Always fatal at the orchestrator level: the working tree may be left in a
/// non-canonical state.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("no line in {path:?} matches {matcher}")]
    NoMatch { path: PathBuf, matcher: String },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    #[error("{path:?} disappeared before it could be reverted")]
    Missing { path: PathBuf },

    #[error(
        "{path:?} line {line} was modified externally: expected {expected:?}, found {found:?}"
    )]
    Drifted {
        path: PathBuf,
        line: usize,
        expected: String,
        found: String,
    },

    #[error("replacement for {path:?} must be a single line, got {replacement:?}")]
    InvalidReplacement { path: PathBuf, replacement: String },

    #[error("invalid line pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to prepare private workspace: {0}")]
    Workspace(String),
}

/// Errors that abort a matrix run.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
}

impl MatrixError {
    /// Whether the working tree may have been left mutated.
    pub fn is_patch_error(&self) -> bool {
        matches!(self, MatrixError::Patch(_))
    }
}

/// Result type for matrix operations.
pub type Result<T> = std::result::Result<T, MatrixError>;
