//! File system watcher with debouncing for watch mode.
//!
//! Watches the working directory recursively and filters changes through
//! the engine's matcher, ignoring output directories, the cache dir, and
//! hidden files so a build never retriggers itself.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use rill_core::Matcher;
use tokio::sync::mpsc;

use crate::error::{CliError, Result};

/// File change event type.
#[derive(Debug, Clone)]
pub enum FileChange {
    /// File was modified
    Modified(PathBuf),
    /// File was created
    Created(PathBuf),
    /// File was removed
    Removed(PathBuf),
}

impl FileChange {
    /// Get the path affected by this change.
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Modified(p) | FileChange::Created(p) | FileChange::Removed(p) => p,
        }
    }
}

/// Recursive watcher with debouncing and ignore filtering.
///
/// Change events arrive through the returned channel. Debouncing collapses
/// rapid successive events for the same file so one save does not trigger
/// several rebuilds.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root`. `ignores` are directory names or glob
    /// patterns relative to the root.
    pub fn new(
        root: PathBuf,
        ignores: &[String],
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        if !root.exists() {
            return Err(CliError::FileNotFound(root));
        }

        let mut matcher = Matcher::new(root.clone());
        for pattern in ignores {
            if pattern.contains(['*', '?', '[']) {
                matcher
                    .add_exclude_glob(pattern)
                    .map_err(CliError::Engine)?;
            } else {
                matcher.add_exclude_path(root.join(pattern));
            }
        }

        let (tx, rx) = mpsc::channel(100);
        let debounce = Duration::from_millis(debounce_ms);
        let mut last_event: Option<(PathBuf, Instant)> = None;
        let root_clone = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                for path in &event.paths {
                    if Self::should_ignore(path, &root_clone, &matcher) {
                        continue;
                    }

                    // Collapse rapid successive events for the same file.
                    let now = Instant::now();
                    if let Some((last_path, last_time)) = &last_event {
                        if last_path == path && now.duration_since(*last_time) < debounce {
                            continue;
                        }
                    }
                    last_event = Some((path.clone(), now));

                    let change = match event.kind {
                        notify::EventKind::Create(_) => FileChange::Created(path.clone()),
                        notify::EventKind::Modify(_) => FileChange::Modified(path.clone()),
                        notify::EventKind::Remove(_) => FileChange::Removed(path.clone()),
                        _ => continue,
                    };
                    let _ = tx.blocking_send(change);
                }
            }
        })
        .map_err(CliError::Watch)?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(CliError::Watch)?;

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    fn should_ignore(path: &Path, root: &Path, matcher: &Matcher) -> bool {
        if !path.starts_with(root) {
            return true;
        }
        // Hidden files and directories never trigger builds.
        if let Ok(rel) = path.strip_prefix(root) {
            for component in rel.components() {
                if let Some(name) = component.as_os_str().to_str() {
                    if name.starts_with('.') && name != "." && name != ".." {
                        return true;
                    }
                }
            }
        }
        !matcher.matches_path(path)
    }

    /// Get the root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
