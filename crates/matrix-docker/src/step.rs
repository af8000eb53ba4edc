//! Setup and test steps executed for one matrix entry.

use serde::{Deserialize, Serialize};

use matrix_core::{ContainerSettings, FailureKind, VersionSpec};

/// Steps of a contained run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// <runtime> pull <image>
    Pull,

    /// <runtime> run -d ... <image> sleep infinity
    Start,

    /// apt-get install of the system packages
    SystemPackages,

    /// Fetch and run the installer bootstrap script
    Bootstrap,

    /// pip install of the runtime manifests
    RuntimeDeps,

    /// pip install of the development manifests
    DevDeps,

    /// The test suite itself
    Tests,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Pull => "pull",
            StepKind::Start => "start",
            StepKind::SystemPackages => "system_packages",
            StepKind::Bootstrap => "bootstrap",
            StepKind::RuntimeDeps => "runtime_deps",
            StepKind::DevDeps => "dev_deps",
            StepKind::Tests => "tests",
        }
    }

    /// Steps that download something and may be retried.
    pub fn is_fetch(&self) -> bool {
        !matches!(self, StepKind::Start | StepKind::Tests)
    }

    /// Classification of a non-zero exit of this step.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StepKind::Tests => FailureKind::TestFailure,
            _ => FailureKind::Provisioning,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A shell script run inside the entry's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStep {
    pub kind: StepKind,
    pub script: String,
}

impl ContainerStep {
    fn new(kind: StepKind, script: impl Into<String>) -> Self {
        Self {
            kind,
            script: script.into(),
        }
    }
}

/// In-container steps for `spec`, after the container has started.
///
/// Steps with nothing to do (no packages, no manifests) are left out.
pub fn plan_steps(settings: &ContainerSettings, spec: &VersionSpec) -> Vec<ContainerStep> {
    let mut steps = Vec::new();

    if !settings.system_packages.is_empty() {
        let packages: Vec<String> = settings.system_packages.iter().map(|p| shell_quote(p)).collect();
        steps.push(ContainerStep::new(
            StepKind::SystemPackages,
            format!(
                "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                packages.join(" ")
            ),
        ));
    }

    let url = settings.bootstrap_url(spec.bootstrap_fragment());
    let local = format!("/tmp/{}", settings.bootstrap_script);
    steps.push(ContainerStep::new(
        StepKind::Bootstrap,
        format!(
            "curl -sSL {} -o {} && {} {}",
            shell_quote(&url),
            shell_quote(&local),
            settings.python,
            shell_quote(&local)
        ),
    ));

    if let Some(script) = pip_install(&settings.python, &settings.runtime_requirements) {
        steps.push(ContainerStep::new(StepKind::RuntimeDeps, script));
    }
    if let Some(script) = pip_install(&settings.python, &settings.dev_requirements) {
        steps.push(ContainerStep::new(StepKind::DevDeps, script));
    }

    steps.push(ContainerStep::new(StepKind::Tests, settings.test_command.clone()));
    steps
}

fn pip_install(python: &str, manifests: &[String]) -> Option<String> {
    if manifests.is_empty() {
        return None;
    }
    let args: Vec<String> = manifests
        .iter()
        .map(|m| format!("-r {}", shell_quote(m)))
        .collect();
    Some(format!("{} -m pip install {}", python, args.join(" ")))
}

/// Quote `s` for `sh` unless it only holds safe characters.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@+,%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
