//! Scoped, guaranteed-revert mutation of one designated source line.
//!
//! [`SourcePatcher::apply`] rewrites the first matching line of a file and
//! returns a [`PatchState`]; [`SourcePatcher::revert`] consumes that state and
//! writes the original line back. Callers should hold the state in a
//! [`PatchGuard`], which reverts on every exit path, including panics and
//! dropped futures.
//!
//! Only the content of the matched line changes. Line terminators and every
//! other byte of the file are preserved, so apply followed by revert leaves
//! the file byte-identical.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::domain::error::PatchError;

/// Predicate selecting the line to patch.
pub trait MatchLine {
    fn matches(&self, line: &str) -> bool;

    /// Human-readable form used in error messages.
    fn describe(&self) -> String {
        "<predicate>".to_string()
    }
}

impl<F> MatchLine for F
where
    F: Fn(&str) -> bool,
{
    fn matches(&self, line: &str) -> bool {
        self(line)
    }
}

/// Built-in line predicates.
#[derive(Debug, Clone)]
pub enum LineMatcher {
    /// Whitespace-trimmed equality.
    Exact(String),
    /// Trimmed line starts with the prefix.
    Prefix(String),
    /// Regular expression over the raw line.
    Regex(Regex),
}

impl LineMatcher {
    pub fn regex(pattern: &str) -> Result<Self, PatchError> {
        Regex::new(pattern)
            .map(LineMatcher::Regex)
            .map_err(|source| PatchError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
    }
}

impl MatchLine for LineMatcher {
    fn matches(&self, line: &str) -> bool {
        match self {
            LineMatcher::Exact(s) => line.trim() == s.trim(),
            LineMatcher::Prefix(p) => line.trim_start().starts_with(p.as_str()),
            LineMatcher::Regex(re) => re.is_match(line),
        }
    }

    fn describe(&self) -> String {
        match self {
            LineMatcher::Exact(s) => format!("exact {s:?}"),
            LineMatcher::Prefix(p) => format!("prefix {p:?}"),
            LineMatcher::Regex(re) => format!("regex {:?}", re.as_str()),
        }
    }
}

/// How a [`PatchRule`] selects its line, in serializable form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MatcherSpec {
    Exact(String),
    Prefix(String),
    Regex(String),
}

impl MatcherSpec {
    pub fn compile(&self) -> Result<LineMatcher, PatchError> {
        match self {
            MatcherSpec::Exact(s) => Ok(LineMatcher::Exact(s.clone())),
            MatcherSpec::Prefix(p) => Ok(LineMatcher::Prefix(p.clone())),
            MatcherSpec::Regex(r) => LineMatcher::regex(r),
        }
    }
}

/// The one designated source patch applied while a matrix entry runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchRule {
    /// File to patch, relative to the workspace root.
    pub file: PathBuf,
    /// Which line to replace.
    pub matcher: MatcherSpec,
    /// Content written in place of the matched line.
    pub replacement: String,
}

impl PatchRule {
    /// Enable the postponed-annotations import that the checked-in source
    /// keeps commented out.
    pub fn future_annotations(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            matcher: MatcherSpec::Exact("# from __future__ import annotations".to_string()),
            replacement: "from __future__ import annotations".to_string(),
        }
    }

    /// Apply this rule inside `workspace`, returning an armed guard.
    pub fn apply_in(&self, workspace: &Path) -> Result<PatchGuard, PatchError> {
        let matcher = self.matcher.compile()?;
        let state = SourcePatcher::apply(workspace.join(&self.file), &matcher, &self.replacement)?;
        Ok(PatchGuard::new(state))
    }
}

impl Default for PatchRule {
    fn default() -> Self {
        Self::future_annotations("gdal_boots/geometry.py")
    }
}

/// Everything needed to undo one applied patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchState {
    pub file_path: PathBuf,
    /// Zero-based index of the patched line.
    pub line_index: usize,
    /// Line content before apply, without terminator.
    pub original_line: String,
    /// Line content written by apply, without terminator.
    pub patched_line: String,
    /// SHA-256 of the whole file before apply.
    pub original_digest: String,
}

/// Stateless apply/revert operations.
pub struct SourcePatcher;

impl SourcePatcher {
    /// Replace the first line of `file_path` accepted by `matcher`.
    pub fn apply<M>(
        file_path: impl Into<PathBuf>,
        matcher: &M,
        replacement_line: &str,
    ) -> Result<PatchState, PatchError>
    where
        M: MatchLine + ?Sized,
    {
        let file_path = file_path.into();
        let replacement = single_line(&file_path, replacement_line)?;
        let content = read_utf8(&file_path)?;
        let original_digest = digest(content.as_bytes());

        let mut lines = split_lines(&content);
        let line_index = lines
            .iter()
            .position(|(body, _)| matcher.matches(body))
            .ok_or_else(|| PatchError::NoMatch {
                path: file_path.clone(),
                matcher: matcher.describe(),
            })?;

        let original_line = lines[line_index].0.to_string();
        lines[line_index].0 = replacement;
        write_lines(&file_path, &lines)?;

        info!(
            file = %file_path.display(),
            line = line_index + 1,
            "Applied source patch"
        );

        Ok(PatchState {
            file_path,
            line_index,
            original_line,
            patched_line: replacement.to_string(),
            original_digest,
        })
    }

    /// Restore the line recorded in `state`.
    ///
    /// Fails if the file is gone or the patched line no longer reads as
    /// apply left it.
    pub fn revert(state: PatchState) -> Result<(), PatchError> {
        let path = &state.file_path;
        let content = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8(bytes).map_err(|_| PatchError::NotUtf8 {
                path: path.clone(),
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PatchError::Missing { path: path.clone() })
            }
            Err(source) => {
                return Err(PatchError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };

        let mut lines = split_lines(&content);
        let found = lines.get(state.line_index).map(|(body, _)| *body);
        if found != Some(state.patched_line.as_str()) {
            return Err(PatchError::Drifted {
                path: path.clone(),
                line: state.line_index + 1,
                expected: state.patched_line.clone(),
                found: found.unwrap_or("<end of file>").to_string(),
            });
        }

        lines[state.line_index].0 = state.original_line.as_str();
        let restored = write_lines(path, &lines)?;

        if digest(restored.as_bytes()) != state.original_digest {
            warn!(
                file = %path.display(),
                "Reverted file differs from its pre-patch content outside the patched line"
            );
        }
        info!(file = %path.display(), line = state.line_index + 1, "Reverted source patch");
        Ok(())
    }
}

/// Holds an applied patch and reverts it exactly once.
///
/// Call [`PatchGuard::revert`] on the normal path to observe errors. If the
/// guard is dropped while still armed (panic, cancellation, early return)
/// the revert runs in `Drop` and failures are logged.
#[derive(Debug)]
#[must_use = "dropping the guard immediately reverts the patch"]
pub struct PatchGuard {
    state: Option<PatchState>,
}

impl PatchGuard {
    pub fn new(state: PatchState) -> Self {
        Self { state: Some(state) }
    }

    pub fn state(&self) -> Option<&PatchState> {
        self.state.as_ref()
    }

    /// Revert now and report the outcome.
    pub fn revert(mut self) -> Result<(), PatchError> {
        match self.state.take() {
            Some(state) => SourcePatcher::revert(state),
            None => Ok(()),
        }
    }
}

impl Drop for PatchGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let path = state.file_path.clone();
            debug!(file = %path.display(), "Reverting source patch from drop guard");
            if let Err(e) = SourcePatcher::revert(state) {
                error!(file = %path.display(), error = %e, "Failed to revert source patch");
            }
        }
    }
}

fn read_utf8(path: &Path) -> Result<String, PatchError> {
    let bytes = std::fs::read(path).map_err(|source| PatchError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| PatchError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

/// Split into `(body, terminator)` pairs; the terminator is `"\n"`, `"\r\n"`
/// or `""` for a final unterminated line.
fn split_lines(content: &str) -> Vec<(&str, &str)> {
    content
        .split_inclusive('\n')
        .map(|line| {
            if let Some(body) = line.strip_suffix("\r\n") {
                (body, "\r\n")
            } else if let Some(body) = line.strip_suffix('\n') {
                (body, "\n")
            } else {
                (line, "")
            }
        })
        .collect()
}

/// `line` without its trailing terminator; embedded line breaks are rejected
/// since revert could no longer find the patched line.
fn single_line<'a>(path: &Path, line: &'a str) -> Result<&'a str, PatchError> {
    let body = line.trim_end_matches(['\r', '\n']);
    if body.contains(['\r', '\n']) {
        return Err(PatchError::InvalidReplacement {
            path: path.to_path_buf(),
            replacement: line.to_string(),
        });
    }
    Ok(body)
}

fn write_lines(path: &Path, lines: &[(&str, &str)]) -> Result<String, PatchError> {
    let mut out = String::new();
    for (body, terminator) in lines {
        out.push_str(body);
        out.push_str(terminator);
    }
    std::fs::write(path, &out).map_err(|source| PatchError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(out)
}

fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
