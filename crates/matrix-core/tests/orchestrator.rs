//! End-to-end orchestration tests against the scripted runner.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use matrix_core::fakes::{Behavior, ScriptedRunner};
use matrix_core::{
    ExecutionControls, FailureKind, MatrixError, Orchestrator, PatchError, PatchRule,
    VersionMatrix, VersionSpec, EXIT_TIMEOUT,
};
use tempfile::{tempdir, TempDir};

const TARGET: &str = "gdal_boots/geometry.py";
const CANONICAL: &str = "# from __future__ import annotations\n\nimport logging\nimport typing as ty\n";
const PATCHED: &str = "from __future__ import annotations\n\nimport logging\nimport typing as ty\n";

fn workspace() -> TempDir {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("gdal_boots")).unwrap();
    std::fs::write(dir.path().join(TARGET), CANONICAL).unwrap();
    dir
}

fn target(ws: &Path) -> PathBuf {
    ws.join(TARGET)
}

fn orchestrator(runner: Arc<ScriptedRunner>, ws: &Path) -> Orchestrator {
    Orchestrator::new(runner, ws).with_patch_rule(PatchRule::future_annotations(TARGET))
}

fn matrix(versions: &[&str]) -> VersionMatrix {
    VersionMatrix::new(versions.iter().map(|v| VersionSpec::new(*v)).collect()).unwrap()
}

#[tokio::test]
async fn scenario_a_all_entries_pass() {
    let ws = workspace();
    let runner = Arc::new(ScriptedRunner::new().with_probe(TARGET));
    let m = VersionMatrix::new(vec![
        VersionSpec::new("3.5.3"),
        VersionSpec::new("3.4.3").with_bootstrap_variant("legacy"),
    ])
    .unwrap();

    let report = orchestrator(runner.clone(), ws.path()).run_matrix(&m).await.unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.passed));
    assert!(report.overall_passed);
    assert_eq!(report.results[1].spec.bootstrap_variant.as_deref(), Some("legacy"));
    assert_eq!(std::fs::read_to_string(target(ws.path())).unwrap(), CANONICAL);
}

#[tokio::test]
async fn contained_run_sees_patched_source() {
    let ws = workspace();
    let runner = Arc::new(ScriptedRunner::new().with_probe(TARGET));

    orchestrator(runner.clone(), ws.path())
        .run_matrix(&matrix(&["3.5.3", "3.4.3"]))
        .await
        .unwrap();

    for call in runner.calls() {
        assert_eq!(call.probe.as_deref(), Some(PATCHED), "entry {}", call.version);
    }
}

#[tokio::test]
async fn scenario_b_provisioning_failure_is_recorded() {
    let ws = workspace();
    let runner = Arc::new(ScriptedRunner::new().with("3.5.3", Behavior::FailProvisioning(125)));

    let report = orchestrator(runner, ws.path())
        .run_matrix(&matrix(&["3.5.3"]))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    let r = &report.results[0];
    assert!(!r.passed);
    assert_ne!(r.exit_code, 0);
    assert_eq!(r.failure, Some(FailureKind::Provisioning));
    assert!(!report.overall_passed);
    assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
}

#[tokio::test]
async fn scenario_c_crash_still_reverts() {
    let ws = workspace();
    let runner = Arc::new(ScriptedRunner::new().with("3.5.3", Behavior::Panic));

    let report = orchestrator(runner, ws.path())
        .run_matrix(&matrix(&["3.5.3", "3.4.3"]))
        .await
        .unwrap();

    let crashed = &report.results[0];
    assert_eq!(crashed.failure, Some(FailureKind::Crashed));
    assert!(crashed.output.contains("scripted crash"));
    assert!(report.results[1].passed);
    assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
}

#[tokio::test]
async fn failing_entry_does_not_affect_later_entries() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_probe(TARGET)
            .with("3.4.3", Behavior::FailTests(1)),
    );

    let report = orchestrator(runner.clone(), ws.path())
        .run_matrix(&matrix(&["3.6.0", "3.4.3", "3.3.0", "3.2.0"]))
        .await
        .unwrap();

    assert_eq!(runner.called_versions(), vec!["3.6.0", "3.4.3", "3.3.0", "3.2.0"]);
    let passed: Vec<bool> = report.results.iter().map(|r| r.passed).collect();
    assert_eq!(passed, vec![true, false, true, true]);
    assert_eq!(report.results[1].failure, Some(FailureKind::TestFailure));
    assert!(!report.overall_passed);

    // Later entries observed the same patched source as the first one.
    let calls = runner.calls();
    assert!(calls.iter().all(|c| c.probe.as_deref() == Some(PATCHED)));
}

#[tokio::test]
async fn revert_failure_aborts_remaining_entries() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_probe(TARGET)
            .with("3.4.3", Behavior::DeleteProbe),
    );

    let err = orchestrator(runner.clone(), ws.path())
        .run_matrix(&matrix(&["3.5.3", "3.4.3", "3.3.0"]))
        .await
        .unwrap_err();

    assert!(err.is_patch_error());
    assert!(matches!(err, MatrixError::Patch(PatchError::Missing { .. })));
    assert_eq!(runner.called_versions(), vec!["3.5.3", "3.4.3"]);
}

#[tokio::test]
async fn external_modification_is_fatal() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_probe(TARGET)
            .with("3.5.3", Behavior::OverwriteProbe("rewritten\n".to_string())),
    );

    let err = orchestrator(runner.clone(), ws.path())
        .run_matrix(&matrix(&["3.5.3", "3.4.3"]))
        .await
        .unwrap_err();

    assert!(matches!(err, MatrixError::Patch(PatchError::Drifted { .. })));
    assert_eq!(runner.called_versions(), vec!["3.5.3"]);
}

#[tokio::test]
async fn missing_patch_target_aborts_before_running() {
    let ws = tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());

    let err = orchestrator(runner.clone(), ws.path())
        .run_matrix(&matrix(&["3.5.3"]))
        .await
        .unwrap_err();

    assert!(err.is_patch_error());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn empty_matrix_passes_vacuously() {
    let ws = workspace();
    let runner = Arc::new(ScriptedRunner::new());

    let report = orchestrator(runner, ws.path())
        .run_matrix(&matrix(&[]))
        .await
        .unwrap();

    assert!(report.results.is_empty());
    assert!(report.overall_passed);
}

#[tokio::test(start_paused = true)]
async fn entry_timeout_is_forced_failure_and_reverts() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new().with("3.5.3", Behavior::Sleep(Duration::from_secs(600))),
    );
    let controls = ExecutionControls {
        entry_timeout_secs: 5,
        ..Default::default()
    };

    let report = orchestrator(runner, ws.path())
        .with_controls(controls)
        .run_matrix(&matrix(&["3.5.3", "3.4.3"]))
        .await
        .unwrap();

    let r = &report.results[0];
    assert_eq!(r.failure, Some(FailureKind::Timeout));
    assert_eq!(r.exit_code, EXIT_TIMEOUT);
    assert!(report.results[1].passed);
    assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
}

#[tokio::test]
async fn cancelled_matrix_restores_source() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new().with("3.5.3", Behavior::Sleep(Duration::from_secs(600))),
    );
    let orch = orchestrator(runner.clone(), ws.path());
    let m = matrix(&["3.5.3"]);

    let outcome = tokio::time::timeout(Duration::from_millis(50), orch.run_matrix(&m)).await;

    assert!(outcome.is_err(), "matrix should have been cancelled");
    assert_eq!(runner.called_versions(), vec!["3.5.3"]);
    assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
}

#[tokio::test]
async fn repeated_runs_are_idempotent() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with("3.5.3", Behavior::FailTests(2))
            .with("3.4.3", Behavior::Panic),
    );
    let orch = orchestrator(runner, ws.path());
    let m = matrix(&["3.5.3", "3.4.3", "3.3.0"]);

    for _ in 0..3 {
        orch.run_matrix(&m).await.unwrap();
        assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
    }
}

#[tokio::test]
async fn parallel_entries_use_private_workspaces() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_probe(TARGET)
            .with("3.4.3", Behavior::FailTests(1)),
    );

    let report = orchestrator(runner.clone(), ws.path())
        .run_matrix_parallel(&matrix(&["3.6.0", "3.5.3", "3.4.3"]), 3)
        .await
        .unwrap();

    let versions: Vec<&str> = report.results.iter().map(|r| r.version()).collect();
    assert_eq!(versions, vec!["3.6.0", "3.5.3", "3.4.3"]);
    assert!(!report.overall_passed);
    assert_eq!(report.failed_count(), 1);

    let calls = runner.calls();
    assert_eq!(calls.len(), 3);
    for call in &calls {
        assert_ne!(call.workspace, ws.path());
        assert_eq!(call.probe.as_deref(), Some(PATCHED));
    }
    assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
}

#[tokio::test]
async fn parallel_with_one_job_is_sequential() {
    let ws = workspace();
    let runner = Arc::new(ScriptedRunner::new());

    let report = orchestrator(runner.clone(), ws.path())
        .run_matrix_parallel(&matrix(&["3.5.3", "3.4.3"]), 1)
        .await
        .unwrap();

    assert!(report.overall_passed);
    assert!(runner.calls().iter().all(|c| c.workspace == ws.path()));
}

#[tokio::test]
async fn parallel_patch_error_is_fatal() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_probe(TARGET)
            .with("3.5.3", Behavior::DeleteProbe),
    );

    let err = orchestrator(runner, ws.path())
        .run_matrix_parallel(&matrix(&["3.5.3", "3.4.3"]), 2)
        .await
        .unwrap_err();

    assert!(err.is_patch_error());
    assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
}

#[tokio::test]
async fn parallel_patch_error_skips_queued_entries() {
    let ws = workspace();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_probe(TARGET)
            .with("3.5.3", Behavior::DeleteProbe)
            .with("3.4.3", Behavior::Sleep(Duration::from_millis(300))),
    );

    let err = orchestrator(runner.clone(), ws.path())
        .run_matrix_parallel(&matrix(&["3.5.3", "3.4.3", "3.3.0", "3.2.0"]), 2)
        .await
        .unwrap_err();

    assert!(matches!(err, MatrixError::Patch(PatchError::Missing { .. })));
    let called = runner.called_versions();
    assert!(called.contains(&"3.5.3".to_string()));
    assert!(called.contains(&"3.4.3".to_string()));
    assert!(!called.contains(&"3.3.0".to_string()), "queued entry ran: {called:?}");
    assert!(!called.contains(&"3.2.0".to_string()), "queued entry ran: {called:?}");
    assert_eq!(std::fs::read(target(ws.path())).unwrap(), CANONICAL.as_bytes());
}
