//! File-system capability.
//!
//! Async operations over `tokio::fs` plus the sync equivalents used by the
//! lazy content loaders. Writes are atomic: content lands in a sibling
//! `.tmp` file and is renamed into place, so readers never observe a
//! partial artifact.

use std::io;
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Read a file's bytes.
pub async fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

/// Write a file atomically, creating parent directories as needed.
pub async fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let temp = temp_path(path);
    tokio::fs::write(&temp, contents).await?;
    match tokio::fs::rename(&temp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp).await;
            Err(e)
        }
    }
}

/// Copy a file, creating the target's parent directories as needed.
pub async fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::copy(from, to).await.map(|_| ())
}

/// Delete a file. Returns `false` when it did not exist.
pub async fn delete_file(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove the parent directory of `path`, and its parents in turn, for as
/// long as they are empty. Stops silently at the first non-empty ancestor
/// and never removes `stop` itself.
pub async fn delete_parent_dir_if_empty(path: &Path, stop: Option<&Path>) -> io::Result<()> {
    let mut current = path.parent().map(Path::to_path_buf);
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || stop.is_some_and(|s| dir == s) {
            break;
        }
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => break,
        };
        if entries.next_entry().await?.is_some() {
            break;
        }
        if tokio::fs::remove_dir(&dir).await.is_err() {
            break;
        }
        current = dir.parent().map(Path::to_path_buf);
    }
    Ok(())
}

/// Sync read, used by the lazy content loaders.
pub fn read_file_sync(path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
}

/// Sync atomic write.
pub fn write_file_sync(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let temp = temp_path(path);
    std::fs::write(&temp, contents)?;
    match std::fs::rename(&temp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            Err(e)
        }
    }
}
