//! Private workspace copies for parallel matrix entries.
//!
//! Each parallel entry patches its own copy, so two entries never touch the
//! same file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// Directory names never copied into a private workspace.
pub const SKIPPED_DIRS: &[&str] = &[".git", ".tox", ".venv", "target", "__pycache__"];

/// A throwaway copy of the workspace, removed on drop.
#[derive(Debug)]
pub struct PrivateWorkspace {
    dir: TempDir,
}

impl PrivateWorkspace {
    /// Copy `source` into a fresh temporary directory.
    pub fn copy_from(source: &Path, label: &str) -> std::io::Result<Self> {
        let prefix = format!("compat-matrix-{}-", sanitize(label));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir()?;
        let copied = copy_tree(source, dir.path())?;
        debug!(
            source = %source.display(),
            dest = %dir.path().display(),
            files = copied,
            "Prepared private workspace"
        );
        Ok(Self { dir })
    }

    /// [`copy_from`](Self::copy_from) on the blocking thread pool.
    pub async fn prepare(source: PathBuf, label: String) -> std::io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::copy_from(&source, &label))
            .await
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Recursively copy `src` into `dst`, returning the number of files copied.
///
/// Symlinks are recreated as links with the same target.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        std::fs::create_dir_all(&to)?;
        for entry in std::fs::read_dir(&from)? {
            let entry = entry?;
            let name = entry.file_name();
            let file_type = entry.file_type()?;
            let target = to.join(&name);

            if file_type.is_dir() {
                if name.to_str().is_some_and(|n| SKIPPED_DIRS.contains(&n)) {
                    continue;
                }
                pending.push((entry.path(), target));
            } else if file_type.is_symlink() {
                copy_symlink(&entry.path(), &target)?;
                copied += 1;
            } else if file_type.is_file() {
                std::fs::copy(entry.path(), &target)?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        format!("cannot copy symlink {}", link.display()),
    ))
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}
