//! Readiness checking for the cgroup hierarchy root.
//!
//! The same check runs at startup (fail fast on a misconfigured root) and
//! behind the `/readyz` endpoint (report when the root disappears at
//! runtime, e.g. after a mount namespace change).

use std::io;
use std::path::{Path, PathBuf};

use crate::cgroup::CONTROLLERS_FILE;

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("cgroup root `{path}` is not accessible: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cgroup root `{path}` is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("cgroup root `{path}` has no `cgroup.controllers`; not a cgroup v2 mount")]
    NotCgroupV2 { path: PathBuf },
}

/// Checks that the configured root exists and looks like a cgroup v2 mount.
///
/// # Errors
///
/// Returns a [`ReadinessError`] naming the first failed requirement.
pub fn check_cgroup_root(root: &Path) -> Result<(), ReadinessError> {
    let metadata = std::fs::metadata(root).map_err(|source| ReadinessError::Unavailable {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(ReadinessError::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    if !root.join(CONTROLLERS_FILE).is_file() {
        return Err(ReadinessError::NotCgroupV2 {
            path: root.to_path_buf(),
        });
    }
    Ok(())
}
