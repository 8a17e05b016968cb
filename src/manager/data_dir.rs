//! etcd data directory lifecycle
//!
//! The data directory is wiped before every launch: etcd always rejoins
//! from scratch and catches up from its peers.

use super::Manager;
use std::io;
use std::path::Path;
use tracing::{info, warn};

impl Manager {
    /// Remove whatever sits at the data directory path
    ///
    /// Failures are logged and swallowed; the next cycle tries again.
    pub fn clean_data_dir(&self) {
        let path = &self.config.data_dir;
        match remove_path(path) {
            Ok(true) => info!(path = %path.display(), "Removed etcd data directory"),
            Ok(false) => {}
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove etcd data directory, continuing"
            ),
        }
    }
}

/// Remove a directory tree, regular file or symlink at `path`
///
/// Symlinks are removed themselves, never followed. Returns `Ok(false)` when
/// nothing was there.
pub fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(true)
}
