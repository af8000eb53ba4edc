//! Domain types: matrix entries, results, and the error taxonomy.

pub mod error;
pub mod result;
pub mod version_spec;

pub use error::{ConfigurationError, MatrixError, PatchError, Result};
pub use result::{
    ExecutionResult, FailureKind, MatrixReport, EXIT_CRASHED, EXIT_PROVISIONING, EXIT_TIMEOUT,
};
pub use version_spec::VersionSpec;
