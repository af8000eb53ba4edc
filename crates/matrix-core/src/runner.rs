//! Container runner trait.
//!
//! A runner owns one ephemeral environment per call: it provisions it, runs
//! setup and the test suite inside it, and tears it down before returning.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::result::ExecutionResult;
use crate::domain::version_spec::VersionSpec;

/// Backend that executes one matrix entry in an isolated environment.
///
/// Implementations never fail at the type level: provisioning problems and
/// test failures are both reported through [`ExecutionResult`]. Dropping the
/// returned future must still tear the environment down.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    /// Run the test suite for `spec` against the workspace at `workspace`.
    async fn run(&self, spec: &VersionSpec, workspace: &Path) -> ExecutionResult;

    /// Short backend name used in logs.
    fn name(&self) -> &str {
        "container"
    }
}
