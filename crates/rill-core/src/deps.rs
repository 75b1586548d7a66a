//! Dependency tracker for watch mode.
//!
//! Two directed edge sets keyed by absolute source path: `deps` (the
//! source must be rebuilt when the target changes) and `refs` (weaker: the
//! source only needs a content refresh). Edges carry the diagnostic that
//! introduced them, when one exists, so watch-mode reporting can point at
//! the requesting position. Both sets persist across runs through the
//! `dep-graph` store.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::diagnostic::LogEntry;
use crate::pathx;

type EdgeSet = FxHashMap<PathBuf, FxHashMap<PathBuf, Option<LogEntry>>>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DependencyTracker {
    deps: EdgeSet,
    refs: EdgeSet,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `src` must be rebuilt when `target` changes.
    /// Idempotent; the first recorded diagnostic wins.
    pub fn add_dep(&mut self, src: &Path, target: &Path, log: Option<LogEntry>) {
        self.deps
            .entry(src.to_path_buf())
            .or_default()
            .entry(target.to_path_buf())
            .or_insert(log);
    }

    /// Record that `src` references `target` (content-only refresh).
    pub fn add_ref(&mut self, src: &Path, target: &Path, log: Option<LogEntry>) {
        self.refs
            .entry(src.to_path_buf())
            .or_default()
            .entry(target.to_path_buf())
            .or_insert(log);
    }

    /// Sources requiring a full rebuild when `changed` changes.
    pub fn dependents_of(&self, changed: &Path) -> Vec<PathBuf> {
        collect_sources(&self.deps, changed)
    }

    /// Sources requiring a content-only refresh when `changed` changes.
    pub fn referrers_of(&self, changed: &Path) -> Vec<PathBuf> {
        collect_sources(&self.refs, changed)
    }

    /// Drop all edges recorded for `src`, ahead of reprocessing it.
    pub fn clear_source(&mut self, src: &Path) {
        self.deps.remove(src);
        self.refs.remove(src);
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty() && self.refs.is_empty()
    }

    pub fn dep_count(&self) -> usize {
        self.deps.values().map(FxHashMap::len).sum()
    }

    pub fn ref_count(&self) -> usize {
        self.refs.values().map(FxHashMap::len).sum()
    }
}

fn collect_sources(edges: &EdgeSet, changed: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = edges
        .iter()
        .filter(|(_, targets)| targets.keys().any(|t| pathx::path_equals(t, changed)))
        .map(|(src, _)| src.clone())
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dep_invalidation() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dep(Path::new("/w/main.css"), Path::new("/w/base.css"), None);
        tracker.add_dep(Path::new("/w/other.css"), Path::new("/w/base.css"), None);
        tracker.add_ref(Path::new("/w/page.html"), Path::new("/w/base.css"), None);

        let rebuilds = tracker.dependents_of(Path::new("/w/base.css"));
        assert_eq!(
            rebuilds,
            vec![PathBuf::from("/w/main.css"), PathBuf::from("/w/other.css")]
        );
        let refreshes = tracker.referrers_of(Path::new("/w/base.css"));
        assert_eq!(refreshes, vec![PathBuf::from("/w/page.html")]);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dep(Path::new("/a"), Path::new("/b"), None);
        tracker.add_dep(Path::new("/a"), Path::new("/b"), Some(LogEntry::info("dup")));
        assert_eq!(tracker.dep_count(), 1);
    }

    #[test]
    fn test_clear_source() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dep(Path::new("/a"), Path::new("/b"), None);
        tracker.add_ref(Path::new("/a"), Path::new("/c"), None);
        tracker.clear_source(Path::new("/a"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dep(Path::new("/a"), Path::new("/b"), None);
        let json = serde_json::to_string(&tracker).unwrap();
        let back: DependencyTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dep_count(), 1);
    }
}
