//! Filesystem port
//!
//! The few file operations the recorder performs on segment files.

use std::fs;
use std::io;
use std::path::Path;

pub trait FileSystem: Send + Sync {
    /// Remove `path` if it exists. Returns whether a file was removed.
    fn remove_if_exists(&self, path: &Path) -> io::Result<bool>;

    /// Move `from` to `to`, replacing any file at `to`
    fn move_item(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// `FileSystem` backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn remove_if_exists(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn move_item(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.remove_if_exists(to)?;

        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(rename_error) => {
                // Rename fails across devices; fall back to copy + remove
                tracing::debug!(
                    "Rename {:?} -> {:?} failed ({}), copying instead",
                    from,
                    to,
                    rename_error
                );
                fs::copy(from, to)?;
                fs::remove_file(from)
            }
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
