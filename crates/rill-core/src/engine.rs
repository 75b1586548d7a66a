//! The build engine.
//!
//! An [`Engine`] is the process-wide state a pipeline runs against: working
//! mode, defaults for encoding and source-map emission, the task barrier,
//! the dependency tracker, the output cache, and the processor registry.
//! It is cheap to clone (a handle) and is threaded explicitly through
//! files and lists instead of living in globals. Configuration is
//! init-time; mutating defaults after a pipeline has started is not
//! supported.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::barrier::TaskBarrier;
use crate::cache::OutputCache;
use crate::deps::DependencyTracker;
use crate::diagnostic::LogEntry;
use crate::file::{Encoding, File, FileData, SharedFile};
use crate::list::FileList;
use crate::matcher::{match_options, Matcher};
use crate::pathx;
use crate::processor::{Processor, ProcessorRegistry};
use crate::sourcemap::SourceMapObject;
use crate::{fsx, Error, Result};

/// What `save` and `delete` actually do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkMode {
    /// Write artifacts.
    #[default]
    Build,
    /// Count work without touching the disk.
    Preview,
    /// Delete the artifacts a build would write.
    Clean,
    /// Build, then re-run affected segments on change.
    Watch,
}

impl WorkMode {
    /// True for the modes that write artifacts.
    pub fn writes(&self) -> bool {
        matches!(self, WorkMode::Build | WorkMode::Watch)
    }
}

/// Global defaults for source-map emission. Every flag can be overridden
/// per file.
#[derive(Debug, Clone)]
pub struct SourceMapOptions {
    /// Emit maps at all.
    pub enabled: bool,
    /// Inline the map as a `data:` URI instead of a sibling file.
    pub inline: bool,
    /// Append the `sourceMappingURL` comment to the artifact.
    pub url_comment: bool,
    /// Embed original source text in the emitted map.
    pub include_sources_content: bool,
    /// Keep the `names` table in the emitted map.
    pub include_names: bool,
    /// Value for the map's `sourceRoot` field; sources are made relative
    /// to it instead of the map's directory.
    pub source_root: Option<String>,
}

impl Default for SourceMapOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            inline: false,
            url_comment: true,
            include_sources_content: false,
            include_names: true,
            source_root: None,
        }
    }
}

/// Init-time callbacks into the embedding application.
#[derive(Default)]
pub struct Hooks {
    /// Return `false` to skip saving a file; called with the resolved
    /// target path.
    pub save_filter: Option<Box<dyn Fn(&File, &Path) -> bool + Send + Sync>>,
    /// Rewrite a source path before it lands in an emitted map.
    pub source_map_source: Option<Box<dyn Fn(&Path) -> Option<String> + Send + Sync>>,
    /// Supply original content for a source in an emitted map.
    pub source_map_source_content: Option<Box<dyn Fn(&Path) -> Option<String> + Send + Sync>>,
    /// Override the URL written into the `sourceMappingURL` comment;
    /// called with the external map's path.
    pub source_map_url: Option<Box<dyn Fn(&Path) -> Option<String> + Send + Sync>>,
    /// Final say over the emitted map object.
    pub source_map_validate: Option<Box<dyn Fn(&File, &mut SourceMapObject) + Send + Sync>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("save_filter", &self.save_filter.is_some())
            .field("source_map_source", &self.source_map_source.is_some())
            .field(
                "source_map_source_content",
                &self.source_map_source_content.is_some(),
            )
            .field("source_map_url", &self.source_map_url.is_some())
            .field("source_map_validate", &self.source_map_validate.is_some())
            .finish()
    }
}

/// Engine construction options.
#[derive(Debug, Default)]
pub struct EngineOptions {
    /// Working directory; defaults to the process working directory.
    pub cwd: Option<PathBuf>,
    pub mode: WorkMode,
    pub encoding: Encoding,
    /// Allow saving over an existing source file.
    pub overwrite: bool,
    pub source_map: SourceMapOptions,
    /// Tool-owned directory for persisted stores; defaults to
    /// `<cwd>/.rill`.
    pub cache_dir: Option<PathBuf>,
    pub hooks: Hooks,
}

pub(crate) struct EngineInner {
    cwd: PathBuf,
    mode: WorkMode,
    encoding: Encoding,
    overwrite: bool,
    map_options: SourceMapOptions,
    cache_dir: PathBuf,
    hooks: Hooks,
    barrier: TaskBarrier,
    deps: Mutex<DependencyTracker>,
    cache: Mutex<OutputCache>,
    registry: ProcessorRegistry,
    processed: AtomicUsize,
    errors: AtomicUsize,
    warnings: AtomicUsize,
}

/// Handle to the process-wide build state. Cloning is cheap.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let cwd = options
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let cache_dir = options.cache_dir.unwrap_or_else(|| cwd.join(".rill"));
        Self {
            inner: Arc::new(EngineInner {
                cwd,
                mode: options.mode,
                encoding: options.encoding,
                overwrite: options.overwrite,
                map_options: options.source_map,
                cache_dir,
                hooks: options.hooks,
                barrier: TaskBarrier::new(),
                deps: Mutex::new(DependencyTracker::new()),
                cache: Mutex::new(OutputCache::new()),
                registry: ProcessorRegistry::new(),
                processed: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
                warnings: AtomicUsize::new(0),
            }),
        }
    }

    /// An engine with default options, rooted at the process working
    /// directory.
    pub fn with_defaults() -> Self {
        Self::new(EngineOptions::default())
    }

    pub fn cwd(&self) -> &Path {
        &self.inner.cwd
    }

    pub fn mode(&self) -> WorkMode {
        self.inner.mode
    }

    pub fn default_encoding(&self) -> Encoding {
        self.inner.encoding
    }

    pub fn overwrite(&self) -> bool {
        self.inner.overwrite
    }

    pub fn map_options(&self) -> &SourceMapOptions {
        &self.inner.map_options
    }

    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    pub fn barrier(&self) -> &TaskBarrier {
        &self.inner.barrier
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    /// Resolve a path against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        pathx::resolve_path(self.cwd(), path)
    }

    // --- counters -------------------------------------------------------

    pub(crate) fn add_processed(&self) {
        self.inner.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn processed_count(&self) -> usize {
        self.inner.processed.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn error_count(&self) -> usize {
        self.inner.errors.load(Ordering::SeqCst)
    }

    pub(crate) fn record_warning(&self) {
        self.inner.warnings.fetch_add(1, Ordering::SeqCst);
    }

    pub fn warning_count(&self) -> usize {
        self.inner.warnings.load(Ordering::SeqCst)
    }

    /// Nonzero when the run finished with errors.
    pub fn exit_code(&self) -> i32 {
        if self.error_count() > 0 {
            1
        } else {
            0
        }
    }

    // --- dependency tracking -------------------------------------------

    pub fn add_dep(&self, src: &Path, target: &Path, log: Option<LogEntry>) {
        self.inner.deps.lock().add_dep(src, target, log);
    }

    pub fn add_ref(&self, src: &Path, target: &Path, log: Option<LogEntry>) {
        self.inner.deps.lock().add_ref(src, target, log);
    }

    pub fn dependents_of(&self, changed: &Path) -> Vec<PathBuf> {
        self.inner.deps.lock().dependents_of(changed)
    }

    pub fn referrers_of(&self, changed: &Path) -> Vec<PathBuf> {
        self.inner.deps.lock().referrers_of(changed)
    }

    pub fn clear_deps_for(&self, src: &Path) {
        self.inner.deps.lock().clear_source(src);
    }

    // --- output cache ---------------------------------------------------

    pub(crate) fn record_output(&self, src: &Path, output: &Path) {
        self.inner.cache.lock().record(src, output);
    }

    pub fn tracked_outputs(&self) -> Vec<PathBuf> {
        self.inner.cache.lock().all_outputs()
    }

    /// Load persisted stores. Corrupt or incompatible stores are discarded
    /// with a warning; missing stores are a cold start.
    pub fn load_state(&self) {
        match OutputCache::load(self.cache_dir()) {
            Ok(Some(cache)) => *self.inner.cache.lock() = cache,
            Ok(None) => {}
            Err(e) => tracing::warn!("discarding output cache: {}", e),
        }
        match DependencyTracker::load(self.cache_dir()) {
            Ok(Some(deps)) => *self.inner.deps.lock() = deps,
            Ok(None) => {}
            Err(e) => tracing::warn!("discarding dependency graph: {}", e),
        }
    }

    /// Persist the output cache and dependency graph.
    pub fn save_state(&self) -> Result<()> {
        self.inner.cache.lock().save(self.cache_dir())?;
        self.inner.deps.lock().save(self.cache_dir())?;
        Ok(())
    }

    /// Delete every artifact a previous build recorded, removing parent
    /// directories that become empty. Returns the number of files removed.
    pub async fn clean_tracked(&self) -> Result<usize> {
        let outputs = self.tracked_outputs();
        let mut removed = 0usize;
        for output in &outputs {
            match fsx::delete_file(output).await {
                Ok(true) => {
                    removed += 1;
                    fsx::delete_parent_dir_if_empty(output, Some(self.cwd())).await?;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("cannot delete {}: {}", output.display(), e),
            }
        }
        self.inner.cache.lock().clear();
        Ok(removed)
    }

    // --- processors -----------------------------------------------------

    /// Register a named processor, replacing any previous registration.
    pub fn register_processor(&self, name: impl Into<String>, processor: Processor) {
        self.inner.registry.register(name, processor);
    }

    pub fn resolve_processor(&self, name: &str) -> Result<Arc<Processor>> {
        self.inner
            .registry
            .resolve(name)
            .ok_or_else(|| Error::ProcessorNotFound(name.to_string()))
    }

    // --- pipeline entry points -----------------------------------------

    /// Construct a file owned by this engine.
    pub fn file(
        &self,
        src_path: Option<PathBuf>,
        path: Option<PathBuf>,
        data: Option<FileData>,
    ) -> SharedFile {
        Arc::new(Mutex::new(File::new(self.clone(), src_path, path, data)))
    }

    /// Scan globs into a root list. `!`-prefixed patterns exclude.
    ///
    /// The returned list has already ended; stages attached to it replay
    /// the scanned files.
    pub fn src(&self, patterns: &[&str]) -> Result<FileList> {
        let list = FileList::new(self.clone());
        let matcher = Matcher::from_patterns(patterns, self.cwd())?;
        let mut seen: FxHashSet<PathBuf> = FxHashSet::default();

        for pattern in patterns.iter().filter(|p| !p.starts_with('!')) {
            let full = if Path::new(pattern).is_absolute() {
                (*pattern).to_string()
            } else {
                format!("{}/{}", pathx::to_slash_string(self.cwd()), pattern)
            };
            let paths = glob::glob_with(&full, match_options()).map_err(|e| Error::Pattern {
                pattern: (*pattern).to_string(),
                message: e.to_string(),
            })?;
            for entry in paths {
                match entry {
                    Ok(path) => {
                        if path.is_file()
                            && seen.insert(path.clone())
                            && matcher.matches_path(&path)
                        {
                            let rel = pathx::relative_path(self.cwd(), &path);
                            list.add(self.file(Some(path), Some(rel), None));
                        }
                    }
                    Err(e) => tracing::warn!("skipping unreadable path: {}", e),
                }
            }
        }

        list.end();
        Ok(list)
    }

    /// Resolve once every in-flight task has completed.
    pub async fn idle(&self) {
        self.inner.barrier.wait_idle().await;
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cwd", &self.inner.cwd)
            .field("mode", &self.inner.mode)
            .field("processed", &self.processed_count())
            .field("errors", &self.error_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(EngineOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(engine.mode(), WorkMode::Build);
        assert_eq!(engine.cache_dir(), dir.path().join(".rill"));
        assert_eq!(engine.exit_code(), 0);
    }

    #[test]
    fn test_exit_code_reflects_errors() {
        let engine = Engine::with_defaults();
        engine.record_error();
        assert_eq!(engine.exit_code(), 1);
    }

    #[test]
    fn test_resolve_processor_missing() {
        let engine = Engine::with_defaults();
        assert!(matches!(
            engine.resolve_processor("nope"),
            Err(Error::ProcessorNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_src_scans_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.log"), "b").unwrap();

        let engine = Engine::new(EngineOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let list = engine.src(&["*.txt"]).unwrap();
        assert!(list.ended());
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_src_with_exclusion() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("vendor")).unwrap();
        std::fs::write(dir.path().join("a.js"), "a").unwrap();
        std::fs::write(dir.path().join("vendor/b.js"), "b").unwrap();

        let engine = Engine::new(EngineOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let list = engine.src(&["**/*.js", "!vendor/**"]).unwrap();
        assert_eq!(list.len(), 1);
    }
}
