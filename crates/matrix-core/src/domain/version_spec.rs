//! Matrix entry identity.

use serde::{Deserialize, Serialize};

/// One (dependency version, bootstrap variant) pair under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VersionSpec {
    /// Version of the native dependency, e.g. `3.5.3`.
    pub dependency_version: String,

    /// URL path fragment selecting a pinned installer snapshot.
    ///
    /// `None` or an empty string selects the latest installer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_variant: Option<String>,
}

impl VersionSpec {
    /// Entry that uses the default bootstrap path.
    pub fn new(dependency_version: impl Into<String>) -> Self {
        Self {
            dependency_version: dependency_version.into(),
            bootstrap_variant: None,
        }
    }

    /// Pin the installer snapshot for this entry.
    pub fn with_bootstrap_variant(mut self, variant: impl Into<String>) -> Self {
        self.bootstrap_variant = Some(variant.into());
        self
    }

    /// The path fragment to insert into the bootstrap URL.
    ///
    /// Surrounding slashes are stripped; an absent variant yields `""`.
    pub fn bootstrap_fragment(&self) -> &str {
        self.bootstrap_variant
            .as_deref()
            .map(|v| v.trim().trim_matches('/'))
            .unwrap_or("")
    }

    /// Whether the default (latest) bootstrap path is used.
    pub fn uses_default_bootstrap(&self) -> bool {
        self.bootstrap_fragment().is_empty()
    }
}

impl std::fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.uses_default_bootstrap() {
            write!(f, "{}", self.dependency_version)
        } else {
            write!(f, "{} ({})", self.dependency_version, self.bootstrap_fragment())
        }
    }
}
