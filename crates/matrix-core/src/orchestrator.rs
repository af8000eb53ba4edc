//! Matrix orchestration.
//!
//! For every entry: apply the source patch, run the entry under its timeout
//! with panic capture, revert the patch, record the result. Entry failures
//! never stop the loop; a patch error stops it immediately.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::domain::error::{MatrixError, PatchError, Result};
use crate::domain::result::{ExecutionResult, MatrixReport};
use crate::domain::version_spec::VersionSpec;
use crate::execution::{with_optional_timeout, ExecutionControls};
use crate::matrix::VersionMatrix;
use crate::patch::PatchRule;
use crate::runner::ContainerRunner;
use crate::workspace::PrivateWorkspace;

/// Drives a [`VersionMatrix`] through a [`ContainerRunner`].
#[derive(Clone)]
pub struct Orchestrator {
    runner: Arc<dyn ContainerRunner>,
    workspace: PathBuf,
    patch: PatchRule,
    controls: ExecutionControls,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn ContainerRunner>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workspace: workspace.into(),
            patch: PatchRule::default(),
            controls: ExecutionControls::default(),
        }
    }

    pub fn with_patch_rule(mut self, patch: PatchRule) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_controls(mut self, controls: ExecutionControls) -> Self {
        self.controls = controls;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Run every entry sequentially against the shared workspace.
    #[instrument(skip_all, fields(entries = matrix.len(), runner = self.runner.name()))]
    pub async fn run_matrix(&self, matrix: &VersionMatrix) -> Result<MatrixReport> {
        let mut report = MatrixReport::new();

        for spec in matrix.entries() {
            info!(version = %spec, "Running matrix entry");
            let result = run_entry(
                self.runner.as_ref(),
                &self.patch,
                &self.controls,
                spec,
                &self.workspace,
            )
            .await
            .map_err(|e| {
                error!(version = %spec, error = %e, "Aborting matrix: source patch failed");
                MatrixError::Patch(e)
            })?;

            log_result(&result);
            report.push(result);
        }

        let report = report.finalize();
        info!(
            passed = report.passed_count(),
            failed = report.failed_count(),
            overall_passed = report.overall_passed,
            "Matrix finished"
        );
        Ok(report)
    }

    /// Run up to `jobs` entries concurrently, each on a private workspace copy.
    ///
    /// The shared workspace is never patched in this mode. A patch error in
    /// any entry prevents queued entries from starting and is returned once
    /// in-flight entries settle.
    #[instrument(skip_all, fields(entries = matrix.len(), jobs = jobs))]
    pub async fn run_matrix_parallel(
        &self,
        matrix: &VersionMatrix,
        jobs: usize,
    ) -> Result<MatrixReport> {
        if jobs <= 1 || matrix.len() <= 1 {
            return self.run_matrix(matrix).await;
        }

        let mut report = MatrixReport::new();
        let sem = Arc::new(Semaphore::new(jobs));
        let results: Arc<Mutex<Vec<(usize, ExecutionResult)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(matrix.len())));
        let fatal: Arc<Mutex<Option<PatchError>>> = Arc::new(Mutex::new(None));
        let (abort_tx, _abort_rx) = watch::channel(false);
        let abort_tx = Arc::new(abort_tx);

        let mut tasks = Vec::with_capacity(matrix.len());
        for (index, spec) in matrix.entries().iter().cloned().enumerate() {
            let this = self.clone();
            let sem = Arc::clone(&sem);
            let results = Arc::clone(&results);
            let fatal = Arc::clone(&fatal);
            let abort_tx = Arc::clone(&abort_tx);
            let abort_rx = abort_tx.subscribe();
            let task_spec = spec.clone();

            let task = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                if *abort_rx.borrow() {
                    warn!(version = %task_spec, "Skipping entry after fatal patch error");
                    return;
                }

                let outcome = match PrivateWorkspace::prepare(
                    this.workspace.clone(),
                    task_spec.dependency_version.clone(),
                )
                .await
                {
                    Ok(ws) => {
                        info!(version = %task_spec, workspace = %ws.path().display(), "Running matrix entry");
                        run_entry(
                            this.runner.as_ref(),
                            &this.patch,
                            &this.controls,
                            &task_spec,
                            ws.path(),
                        )
                        .await
                    }
                    Err(e) => Err(PatchError::Workspace(e.to_string())),
                };

                match outcome {
                    Ok(result) => {
                        log_result(&result);
                        results.lock().await.push((index, result));
                    }
                    Err(e) => {
                        error!(version = %task_spec, error = %e, "Aborting matrix: source patch failed");
                        fatal.lock().await.get_or_insert(e);
                        let _ = abort_tx.send(true);
                    }
                }
            });
            tasks.push((index, spec, task));
        }

        for (index, spec, task) in tasks {
            if let Err(e) = task.await {
                warn!(version = %spec, error = %e, "Matrix entry task ended abnormally");
                results
                    .lock()
                    .await
                    .push((index, ExecutionResult::crashed(spec, e.to_string())));
            }
        }

        if let Some(e) = fatal.lock().await.take() {
            return Err(MatrixError::Patch(e));
        }

        let mut collected = std::mem::take(&mut *results.lock().await);
        collected.sort_by_key(|(index, _)| *index);
        for (_, result) in collected {
            report.push(result);
        }

        let report = report.finalize();
        info!(
            passed = report.passed_count(),
            failed = report.failed_count(),
            overall_passed = report.overall_passed,
            "Matrix finished"
        );
        Ok(report)
    }
}

/// Execute one entry inside a patch guard.
///
/// The guard is reverted explicitly on the normal path; if this future is
/// dropped mid-run the guard's destructor reverts instead.
async fn run_entry(
    runner: &dyn ContainerRunner,
    rule: &PatchRule,
    controls: &ExecutionControls,
    spec: &VersionSpec,
    workspace: &Path,
) -> std::result::Result<ExecutionResult, PatchError> {
    let guard = rule.apply_in(workspace)?;
    let start = Instant::now();

    let run = AssertUnwindSafe(runner.run(spec, workspace)).catch_unwind();
    let result = match with_optional_timeout(controls.entry_timeout(), run).await {
        Some(Ok(result)) => result,
        Some(Err(panic)) => {
            let reason = panic_message(panic.as_ref());
            error!(version = %spec, reason = %reason, "Contained run crashed");
            ExecutionResult::crashed(spec.clone(), format!("contained run crashed: {reason}"))
        }
        None => {
            warn!(version = %spec, limit_secs = controls.entry_timeout_secs, "Entry timed out");
            ExecutionResult::timed_out(spec.clone(), controls.entry_timeout_secs)
        }
    };

    guard.revert()?;

    if result.duration_ms == 0 {
        Ok(result.with_duration_ms(start.elapsed().as_millis() as u64))
    } else {
        Ok(result)
    }
}

fn log_result(result: &ExecutionResult) {
    if result.passed {
        info!(
            version = %result.spec,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Entry passed"
        );
    } else {
        warn!(
            version = %result.spec,
            exit_code = result.exit_code,
            failure = ?result.failure,
            duration_ms = result.duration_ms,
            "Entry failed"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
