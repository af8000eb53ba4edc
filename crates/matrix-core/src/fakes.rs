//! Scripted in-memory runner (testing only).
//!
//! `ScriptedRunner` satisfies the [`ContainerRunner`] contract without a
//! container runtime. Each dependency version is mapped to a scripted
//! [`Behavior`]; every call is recorded together with a snapshot of a probe
//! file so tests can check what the contained run observed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::result::ExecutionResult;
use crate::domain::version_spec::VersionSpec;
use crate::runner::ContainerRunner;

/// What the fake does for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Test suite exits 0.
    Pass,
    /// Test suite exits with the given code.
    FailTests(i32),
    /// Environment could not be created; step exit code.
    FailProvisioning(i32),
    /// The run panics.
    Panic,
    /// The run sleeps this long before passing.
    Sleep(Duration),
    /// The run deletes the probe file, then passes.
    DeleteProbe,
    /// The run overwrites the probe file, then passes.
    OverwriteProbe(String),
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub version: String,
    pub workspace: PathBuf,
    /// Probe file content at the start of the run, if it existed.
    pub probe: Option<String>,
}

/// In-memory runner driven by per-version behaviors.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    behaviors: HashMap<String, Behavior>,
    probe: Option<PathBuf>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    /// Every version passes unless scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, version: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(version.to_string(), behavior);
        self
    }

    /// Snapshot `relative` (inside the workspace) on every call.
    pub fn with_probe(mut self, relative: impl Into<PathBuf>) -> Self {
        self.probe = Some(relative.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_versions(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.version).collect()
    }
}

#[async_trait]
impl ContainerRunner for ScriptedRunner {
    async fn run(&self, spec: &VersionSpec, workspace: &Path) -> ExecutionResult {
        let probe_path = self.probe.as_ref().map(|p| workspace.join(p));
        let probe = probe_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok());
        self.calls.lock().unwrap().push(RecordedCall {
            version: spec.dependency_version.clone(),
            workspace: workspace.to_path_buf(),
            probe,
        });

        let behavior = self
            .behaviors
            .get(&spec.dependency_version)
            .cloned()
            .unwrap_or(Behavior::Pass);

        match behavior {
            Behavior::Pass => ExecutionResult::from_exit_code(spec.clone(), 0, "ok".to_string()),
            Behavior::FailTests(code) => {
                ExecutionResult::from_exit_code(spec.clone(), code, "tests failed".to_string())
            }
            Behavior::FailProvisioning(code) => ExecutionResult::provisioning(
                spec.clone(),
                code,
                "cannot create environment".to_string(),
            ),
            Behavior::Panic => panic!("scripted crash for {}", spec.dependency_version),
            Behavior::Sleep(d) => {
                tokio::time::sleep(d).await;
                ExecutionResult::from_exit_code(spec.clone(), 0, "slow ok".to_string())
            }
            Behavior::DeleteProbe => {
                if let Some(p) = probe_path {
                    let _ = std::fs::remove_file(p);
                }
                ExecutionResult::from_exit_code(spec.clone(), 0, "ok".to_string())
            }
            Behavior::OverwriteProbe(content) => {
                if let Some(p) = probe_path {
                    let _ = std::fs::write(p, content);
                }
                ExecutionResult::from_exit_code(spec.clone(), 0, "ok".to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
