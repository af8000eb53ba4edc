//! Static enumeration of the dependency versions under test.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigurationError;
use crate::domain::version_spec::VersionSpec;

/// Validated, ordered set of matrix entries.
///
/// Construction is the only place validation happens; a `VersionMatrix`
/// value always has non-empty, unique dependency versions.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct VersionMatrix {
    entries: Vec<VersionSpec>,
}

impl VersionMatrix {
    /// Validate and wrap `entries`, keeping their order.
    ///
    /// Surrounding whitespace is stripped from every dependency version.
    pub fn new(mut entries: Vec<VersionSpec>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        for (index, spec) in entries.iter_mut().enumerate() {
            let trimmed = spec.dependency_version.trim();
            if trimmed.len() != spec.dependency_version.len() {
                spec.dependency_version = trimmed.to_string();
            }
            let version = spec.dependency_version.as_str();
            if version.is_empty() {
                return Err(ConfigurationError::EmptyVersion { index });
            }
            if !seen.insert(version.to_string()) {
                return Err(ConfigurationError::DuplicateVersion {
                    version: version.to_string(),
                });
            }
        }
        Ok(Self { entries })
    }

    /// The GDAL versions gdal-boots is tested against.
    ///
    /// 3.4.3 images ship a Python too old for the current `get-pip.py`.
    pub fn default_gdal() -> Self {
        Self {
            entries: vec![
                VersionSpec::new("3.5.3"),
                VersionSpec::new("3.4.3").with_bootstrap_variant("pip/3.6"),
            ],
        }
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[VersionSpec] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Narrow the matrix to the single entry named `version`.
    pub fn select(&self, version: &str) -> Result<Self, ConfigurationError> {
        let version = version.trim();
        self.entries
            .iter()
            .find(|s| s.dependency_version == version)
            .map(|s| Self {
                entries: vec![s.clone()],
            })
            .ok_or_else(|| ConfigurationError::UnknownVersion {
                version: version.to_string(),
                known: self
                    .entries
                    .iter()
                    .map(|s| s.dependency_version.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl<'de> Deserialize<'de> for VersionMatrix {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries = Vec::<VersionSpec>::deserialize(deserializer)?;
        VersionMatrix::new(entries).map_err(serde::de::Error::custom)
    }
}

impl Default for VersionMatrix {
    fn default() -> Self {
        Self::default_gdal()
    }
}
