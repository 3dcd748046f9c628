//! Idempotent file system helpers shared by the store and the sweeper

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Extension of in-progress downloads, renamed into place on success
pub(crate) const PARTIAL_EXTENSION: &str = "part";

/// Sibling path a download of `path` is streamed into
pub(crate) fn partial_path_for(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".");
    partial.push(PARTIAL_EXTENSION);
    PathBuf::from(partial)
}

pub(crate) fn is_partial(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == PARTIAL_EXTENSION)
}

/// Create `dir` and any missing parents
pub(crate) async fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir).await
}

/// Remove a file, treating a missing file as already removed.
///
/// Returns whether this call removed it.
pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, treating a missing directory as already removed
pub(crate) async fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
