//! Lifetime of one disposable container.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use matrix_core::{ContainerSettings, VersionSpec};

use crate::command::{run_command, CommandOutput};
use crate::error::DockerError;

/// Label carrying the dependency version on every container we start.
pub const VERSION_LABEL: &str = "compat-matrix.version";

/// A named container that is force-removed when the handle goes away.
///
/// [`ContainerHandle::remove`] is the normal teardown. If the handle is
/// dropped without it (timeout, cancellation, panic) a detached
/// `<runtime> rm -f` is spawned instead.
#[derive(Debug)]
pub struct ContainerHandle {
    runtime: String,
    name: String,
    removed: bool,
}

impl ContainerHandle {
    /// Reserve a unique container name for `spec`. Nothing is started yet.
    pub fn new(runtime: impl Into<String>, spec: &VersionSpec) -> Self {
        Self {
            runtime: runtime.into(),
            name: container_name(&spec.dependency_version),
            removed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the container detached with `workspace` bind-mounted.
    pub async fn start(
        &self,
        settings: &ContainerSettings,
        spec: &VersionSpec,
        workspace: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DockerError> {
        let args = start_args(settings, &self.name, spec, workspace)?;
        debug!(container = %self.name, image = %settings.image_for(&spec.dependency_version), "Starting container");
        run_command(&self.runtime, &args, timeout).await
    }

    /// Run `script` through `sh -c` inside the container.
    pub async fn exec(
        &self,
        script: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DockerError> {
        let args = vec![
            "exec".to_string(),
            self.name.clone(),
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ];
        run_command(&self.runtime, &args, timeout).await
    }

    /// Force-remove the container and wait for the runtime to confirm.
    ///
    /// The handle stays armed until `rm -f` has returned, so dropping this
    /// future midway still leaves the `Drop` fallback to clean up.
    pub async fn remove(mut self) {
        let args = vec!["rm".to_string(), "-f".to_string(), self.name.clone()];
        let outcome = run_command(&self.runtime, &args, Some(Duration::from_secs(60))).await;
        self.removed = true;
        match outcome {
            Ok(out) if out.success() => debug!(container = %self.name, "Container removed"),
            Ok(out) => warn!(
                container = %self.name,
                exit_code = out.exit_code,
                stderr = %out.stderr.trim(),
                "Container removal reported failure"
            ),
            Err(e) => warn!(container = %self.name, error = %e, "Container removal failed"),
        }
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let spawned = std::process::Command::new(&self.runtime)
            .args(["rm", "-f", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(_) => debug!(container = %self.name, "Spawned background container removal"),
            Err(e) => warn!(container = %self.name, error = %e, "Could not remove container"),
        }
    }
}

/// Arguments of `<runtime> run` for one entry.
pub fn start_args(
    settings: &ContainerSettings,
    name: &str,
    spec: &VersionSpec,
    workspace: &Path,
) -> Result<Vec<String>, DockerError> {
    let host = workspace.to_str().ok_or_else(|| DockerError::Workspace {
        path: workspace.display().to_string(),
        reason: "path is not valid UTF-8".to_string(),
    })?;
    if host.contains(':') {
        return Err(DockerError::Workspace {
            path: host.to_string(),
            reason: "path contains ':'".to_string(),
        });
    }

    Ok(vec![
        "run".to_string(),
        "-d".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--label".to_string(),
        format!("{}={}", VERSION_LABEL, spec.dependency_version),
        "-v".to_string(),
        format!("{}:{}", host, settings.mount_point),
        "-w".to_string(),
        settings.mount_point.clone(),
        settings.image_for(&spec.dependency_version),
        "sleep".to_string(),
        "infinity".to_string(),
    ])
}

/// `compat-matrix-<version>-<8 hex chars>`, restricted to characters the
/// runtimes accept in names.
pub fn container_name(version: &str) -> String {
    let version: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let id = Uuid::new_v4().simple().to_string();
    format!("compat-matrix-{}-{}", version, &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_container_names_are_unique() {
        let a = container_name("3.5.3");
        let b = container_name("3.5.3");
        assert!(a.starts_with("compat-matrix-3.5.3-"));
        assert_eq!(a.len(), "compat-matrix-3.5.3-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_container_name_sanitizes_version() {
        assert!(container_name("3.6/rc 1").starts_with("compat-matrix-3.6_rc_1-"));
    }

    #[test]
    fn test_start_args() {
        let settings = ContainerSettings::default();
        let spec = VersionSpec::new("3.5.3");
        let args = start_args(&settings, "c1", &spec, &PathBuf::from("/src/gdal-boots")).unwrap();
        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--rm",
                "--name",
                "c1",
                "--label",
                "compat-matrix.version=3.5.3",
                "-v",
                "/src/gdal-boots:/workspace",
                "-w",
                "/workspace",
                "osgeo/gdal:ubuntu-small-3.5.3",
                "sleep",
                "infinity",
            ]
        );
    }

    #[test]
    fn test_start_args_rejects_colon_in_path() {
        let err = start_args(
            &ContainerSettings::default(),
            "c1",
            &VersionSpec::new("3.5.3"),
            &PathBuf::from("/tmp/a:b"),
        )
        .unwrap_err();
        assert!(matches!(err, DockerError::Workspace { .. }));
    }
}
