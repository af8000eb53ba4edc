//! [`ContainerRunner`] backed by a container runtime CLI.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use matrix_core::execution::retry_with_backoff;
use matrix_core::{
    ContainerRunner, ContainerSettings, ExecutionControls, ExecutionResult, FailureKind,
    RetryPolicy, VersionSpec, EXIT_PROVISIONING, EXIT_TIMEOUT,
};

use crate::command::{run_command, CommandOutput};
use crate::container::ContainerHandle;
use crate::error::DockerError;
use crate::step::{plan_steps, StepKind};

type StepOutcome = Result<CommandOutput, DockerError>;

/// Runs each entry in a fresh container: pull, start, provision, test,
/// then force-remove.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    settings: ContainerSettings,
    controls: ExecutionControls,
}

impl DockerRunner {
    pub fn new(settings: ContainerSettings, controls: ExecutionControls) -> Self {
        Self { settings, controls }
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    fn policy_for(&self, kind: StepKind) -> RetryPolicy {
        if kind.is_fetch() {
            self.controls.retry_policy()
        } else {
            RetryPolicy::once()
        }
    }

    async fn pull(&self, image: &str) -> (StepOutcome, u32) {
        let args = vec!["pull".to_string(), image.to_string()];
        let timeout = self.controls.step_timeout();
        retry_with_backoff(
            self.policy_for(StepKind::Pull),
            |_| run_command(&self.settings.runtime, &args, timeout),
            step_settled,
        )
        .await
    }

    async fn provision_and_test(
        &self,
        handle: &ContainerHandle,
        spec: &VersionSpec,
        workspace: &Path,
        log: &mut String,
    ) -> ExecutionResult {
        let timeout = self.controls.step_timeout();

        let started = handle.start(&self.settings, spec, workspace, timeout).await;
        if let Some(failed) = settle(spec, StepKind::Start, &started, 1, log) {
            return failed;
        }

        for step in plan_steps(&self.settings, spec) {
            debug!(version = %spec.dependency_version, step = %step.kind, "Running step");
            let (outcome, attempts) = retry_with_backoff(
                self.policy_for(step.kind),
                |_| handle.exec(&step.script, timeout),
                step_settled,
            )
            .await;
            if let Some(failed) = settle(spec, step.kind, &outcome, attempts, log) {
                return failed;
            }
        }

        ExecutionResult::from_exit_code(spec.clone(), 0, std::mem::take(log))
    }

    async fn run_inner(&self, spec: &VersionSpec, workspace: &Path) -> ExecutionResult {
        let mut log = String::new();

        let workspace = match workspace.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                return ExecutionResult::provisioning(
                    spec.clone(),
                    EXIT_PROVISIONING,
                    format!("workspace {}: {}", workspace.display(), e),
                )
            }
        };

        let image = self.settings.image_for(&spec.dependency_version);
        let (pulled, attempts) = self.pull(&image).await;
        if let Some(failed) = settle(spec, StepKind::Pull, &pulled, attempts, &mut log) {
            return failed;
        }

        let handle = ContainerHandle::new(&self.settings.runtime, spec);
        let result = self.provision_and_test(&handle, spec, &workspace, &mut log).await;
        handle.remove().await;
        result
    }
}

#[async_trait]
impl ContainerRunner for DockerRunner {
    #[instrument(skip_all, fields(version = %spec.dependency_version, runtime = %self.settings.runtime))]
    async fn run(&self, spec: &VersionSpec, workspace: &Path) -> ExecutionResult {
        let start = Instant::now();
        let result = self.run_inner(spec, workspace).await;
        let elapsed = start.elapsed().as_millis() as u64;
        info!(
            passed = result.passed,
            exit_code = result.exit_code,
            duration_ms = elapsed,
            "Contained run finished"
        );
        result.with_duration_ms(elapsed)
    }

    fn name(&self) -> &str {
        &self.settings.runtime
    }
}

/// Stop retrying on success and on spawn failures.
fn step_settled(outcome: &StepOutcome) -> bool {
    outcome.as_ref().map_or(true, CommandOutput::success)
}

/// Append a step's output to `log`; return the entry's failed result if the
/// step did not succeed.
fn settle(
    spec: &VersionSpec,
    kind: StepKind,
    outcome: &StepOutcome,
    attempts: u32,
    log: &mut String,
) -> Option<ExecutionResult> {
    log.push_str(&format!("==> [{}] attempt {}\n", kind, attempts));
    let failed = match outcome {
        Ok(out) => {
            let text = out.combined();
            log.push_str(&text);
            if !text.is_empty() && !text.ends_with('\n') {
                log.push('\n');
            }
            if out.success() {
                return None;
            }
            if out.timed_out {
                warn!(version = %spec.dependency_version, step = %kind, "Step timed out");
                ExecutionResult::failed(
                    spec.clone(),
                    FailureKind::Timeout,
                    EXIT_TIMEOUT,
                    std::mem::take(log),
                )
            } else {
                warn!(version = %spec.dependency_version, step = %kind, exit_code = out.exit_code, "Step failed");
                ExecutionResult::failed(
                    spec.clone(),
                    kind.failure_kind(),
                    out.exit_code,
                    std::mem::take(log),
                )
            }
        }
        Err(e) => {
            log.push_str(&format!("{}\n", e));
            warn!(version = %spec.dependency_version, step = %kind, error = %e, "Step could not run");
            ExecutionResult::provisioning(spec.clone(), EXIT_PROVISIONING, std::mem::take(log))
        }
    };
    Some(failed.with_attempts(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(code: i32, timed_out: bool) -> StepOutcome {
        Ok(CommandOutput {
            exit_code: code,
            stdout: "out".to_string(),
            stderr: String::new(),
            duration_ms: 1,
            timed_out,
        })
    }

    #[test]
    fn test_settle_success_appends_output() {
        let mut log = String::new();
        let r = settle(&VersionSpec::new("3.5.3"), StepKind::Bootstrap, &output(0, false), 1, &mut log);
        assert!(r.is_none());
        assert_eq!(log, "==> [bootstrap] attempt 1\nout\n");
    }

    #[test]
    fn test_settle_maps_setup_failure_to_provisioning() {
        let mut log = String::new();
        let r = settle(&VersionSpec::new("3.5.3"), StepKind::DevDeps, &output(1, false), 2, &mut log)
            .unwrap();
        assert_eq!(r.failure, Some(FailureKind::Provisioning));
        assert_eq!(r.exit_code, 1);
        assert_eq!(r.attempts, 2);
        assert!(r.output.contains("==> [dev_deps]"));
    }

    #[test]
    fn test_settle_maps_test_failure() {
        let mut log = String::new();
        let r = settle(&VersionSpec::new("3.5.3"), StepKind::Tests, &output(1, false), 1, &mut log)
            .unwrap();
        assert_eq!(r.failure, Some(FailureKind::TestFailure));
    }

    #[test]
    fn test_settle_step_timeout() {
        let mut log = String::new();
        let r = settle(&VersionSpec::new("3.5.3"), StepKind::Tests, &output(EXIT_TIMEOUT, true), 1, &mut log)
            .unwrap();
        assert_eq!(r.failure, Some(FailureKind::Timeout));
        assert_eq!(r.exit_code, EXIT_TIMEOUT);
    }

    #[test]
    fn test_settle_spawn_error_is_provisioning() {
        let mut log = String::new();
        let err: StepOutcome = Err(DockerError::Spawn {
            program: "docker".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        let r = settle(&VersionSpec::new("3.5.3"), StepKind::Pull, &err, 1, &mut log).unwrap();
        assert_eq!(r.failure, Some(FailureKind::Provisioning));
        assert_eq!(r.exit_code, EXIT_PROVISIONING);
        assert!(step_settled(&err));
    }

    #[tokio::test]
    async fn test_missing_runtime_is_provisioning_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ContainerSettings {
            runtime: "definitely-not-a-container-runtime".to_string(),
            ..Default::default()
        };
        let runner = DockerRunner::new(settings, ExecutionControls::default());

        let r = runner.run(&VersionSpec::new("3.5.3"), dir.path()).await;
        assert!(!r.passed);
        assert_eq!(r.failure, Some(FailureKind::Provisioning));
        assert_eq!(r.exit_code, EXIT_PROVISIONING);
        assert_eq!(r.attempts, 1);
    }

    #[tokio::test]
    async fn test_missing_workspace_is_provisioning_failure() {
        let runner = DockerRunner::new(ContainerSettings::default(), ExecutionControls::default());
        let r = runner
            .run(&VersionSpec::new("3.5.3"), Path::new("/nonexistent/workspace"))
            .await;
        assert_eq!(r.failure, Some(FailureKind::Provisioning));
        assert!(r.output.contains("/nonexistent/workspace"));
    }
}
