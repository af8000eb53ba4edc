//! Harness configuration.
//!
//! Every field has a default matching the gdal-boots project layout, so
//! an empty JSON object (or no file at all) is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::ConfigurationError;
use crate::execution::ExecutionControls;
use crate::matrix::VersionMatrix;
use crate::patch::PatchRule;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "COMPAT_MATRIX_CONFIG";

/// Environment variable overriding the container runtime binary.
pub const RUNTIME_ENV: &str = "COMPAT_MATRIX_RUNTIME";

/// Settings for the container environment an entry runs in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerSettings {
    /// Container runtime CLI (`docker`, `podman`).
    pub runtime: String,
    /// Image reference; `{version}` is replaced by the dependency version.
    pub image_template: String,
    /// Mount point of the workspace inside the container.
    pub mount_point: String,
    /// Distribution packages installed before bootstrapping.
    pub system_packages: Vec<String>,
    /// Base URL of the installer bootstrap script.
    pub bootstrap_base_url: String,
    /// Installer bootstrap script name.
    pub bootstrap_script: String,
    /// Interpreter used for bootstrap, installs and tests.
    pub python: String,
    /// Runtime dependency manifests, relative to the workspace.
    pub runtime_requirements: Vec<String>,
    /// Development dependency manifests, relative to the workspace.
    pub dev_requirements: Vec<String>,
    /// Test suite command, run through `sh -c`.
    pub test_command: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image_template: "osgeo/gdal:ubuntu-small-{version}".to_string(),
            mount_point: "/workspace".to_string(),
            system_packages: vec![
                "curl".to_string(),
                "python3-distutils".to_string(),
            ],
            bootstrap_base_url: "https://bootstrap.pypa.io".to_string(),
            bootstrap_script: "get-pip.py".to_string(),
            python: "python3".to_string(),
            runtime_requirements: vec!["requirements.txt".to_string()],
            dev_requirements: vec!["requirements-dev.txt".to_string()],
            test_command: "python3 -m pytest -v tests".to_string(),
        }
    }
}

impl ContainerSettings {
    /// Image for one dependency version.
    pub fn image_for(&self, version: &str) -> String {
        self.image_template.replace("{version}", version)
    }

    /// Bootstrap URL for a variant fragment (`""` = latest).
    pub fn bootstrap_url(&self, fragment: &str) -> String {
        let base = self.bootstrap_base_url.trim_end_matches('/');
        let fragment = fragment.trim_matches('/');
        if fragment.is_empty() {
            format!("{}/{}", base, self.bootstrap_script)
        } else {
            format!("{}/{}/{}", base, fragment, self.bootstrap_script)
        }
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatrixConfig {
    pub matrix: VersionMatrix,
    pub patch: PatchRule,
    pub container: ContainerSettings,
    pub controls: ExecutionControls,
    /// Command producing the distributable artifact, run through `sh -c`.
    pub build_command: String,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            matrix: VersionMatrix::default_gdal(),
            patch: PatchRule::default(),
            container: ContainerSettings::default(),
            controls: ExecutionControls::default(),
            build_command: "python3 -m build --wheel".to_string(),
        }
    }
}

impl MatrixConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MatrixConfig =
            serde_json::from_str(&content).map_err(|source| ConfigurationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        debug!(path = %path.display(), entries = config.matrix.len(), "Loaded matrix config");
        Ok(config)
    }

    /// Load from `path` if given, else fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.container.runtime.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "container.runtime must not be empty".to_string(),
            ));
        }
        if !self.container.image_template.contains("{version}") {
            return Err(ConfigurationError::Invalid(format!(
                "container.image_template {:?} has no {{version}} placeholder",
                self.container.image_template
            )));
        }
        if self.container.test_command.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "container.test_command must not be empty".to_string(),
            ));
        }
        if self.patch.file.as_os_str().is_empty() || self.patch.file.is_absolute() {
            return Err(ConfigurationError::Invalid(format!(
                "patch.file {:?} must be a path relative to the workspace",
                self.patch.file
            )));
        }
        let replacement = self.patch.replacement.trim_end_matches(['\r', '\n']);
        if replacement.contains(['\r', '\n']) {
            return Err(ConfigurationError::Invalid(format!(
                "patch.replacement {:?} must be a single line",
                self.patch.replacement
            )));
        }
        self.patch
            .matcher
            .compile()
            .map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        Ok(())
    }
}
