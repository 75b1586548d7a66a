//! The file-list pipeline stage.
//!
//! A [`FileList`] is both a producer (`add`, `end`) and a consumer
//! (`on_data`, `on_end`). Listeners registered late are replayed: a `data`
//! subscriber first receives every buffered file synchronously, and an
//! `end` subscriber after termination is invoked immediately with the
//! final files. `pipe` adapts a [`Processor`] into a derived list; `src`,
//! `concat`, `dest`, and `delete` are the built-in stages.
//!
//! Per-file stages raise the task barrier around each file and emit
//! downstream `data` in completion order. Whole-list stages wait for the
//! upstream `end` and handle files strictly sequentially, preserving
//! upstream order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::diagnostic::LogEntry;
use crate::engine::Engine;
use crate::file::{File, SharedFile};
use crate::matcher::Matcher;
use crate::pathx;
use crate::processor::{PipeContext, PipeOptions, Processor};
use crate::{Error, Result};

type DataListener = Box<dyn FnMut(SharedFile) + Send>;
type EndListener = Box<dyn FnOnce(Vec<SharedFile>) + Send>;

struct ListInner {
    files: Vec<SharedFile>,
    ended: bool,
    data_listeners: Vec<DataListener>,
    end_listeners: Vec<EndListener>,
}

/// A streaming, replayed sequence of files. Cloning shares the list.
#[derive(Clone)]
pub struct FileList {
    engine: Engine,
    inner: Arc<Mutex<ListInner>>,
}

/// Input to [`FileList::concat`].
pub enum ConcatSource {
    File(SharedFile),
    List(FileList),
}

impl From<SharedFile> for ConcatSource {
    fn from(file: SharedFile) -> Self {
        ConcatSource::File(file)
    }
}

impl From<FileList> for ConcatSource {
    fn from(list: FileList) -> Self {
        ConcatSource::List(list)
    }
}

/// Where [`FileList::dest`] saves each file.
#[derive(Clone)]
pub enum DestTarget {
    /// Fixed output directory, resolved against the working directory.
    Dir(PathBuf),
    /// Per-file output directory.
    Select(Arc<dyn Fn(&File) -> PathBuf + Send + Sync>),
}

impl DestTarget {
    pub fn select(f: impl Fn(&File) -> PathBuf + Send + Sync + 'static) -> Self {
        DestTarget::Select(Arc::new(f))
    }
}

impl From<&str> for DestTarget {
    fn from(dir: &str) -> Self {
        DestTarget::Dir(PathBuf::from(dir))
    }
}

impl From<String> for DestTarget {
    fn from(dir: String) -> Self {
        DestTarget::Dir(PathBuf::from(dir))
    }
}

impl From<&Path> for DestTarget {
    fn from(dir: &Path) -> Self {
        DestTarget::Dir(dir.to_path_buf())
    }
}

impl From<PathBuf> for DestTarget {
    fn from(dir: PathBuf) -> Self {
        DestTarget::Dir(dir)
    }
}

impl FileList {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            inner: Arc::new(Mutex::new(ListInner {
                files: Vec::new(),
                ended: false,
                data_listeners: Vec::new(),
                end_listeners: Vec::new(),
            })),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Append a file and notify `data` subscribers.
    pub fn add(&self, file: SharedFile) {
        let mut inner = self.inner.lock();
        if inner.ended {
            tracing::warn!("file added to a list that already ended");
        }
        inner.files.push(file.clone());
        for listener in inner.data_listeners.iter_mut() {
            listener(file.clone());
        }
    }

    /// Terminate the list. Fires `end` subscribers exactly once.
    pub fn end(&self) {
        let (listeners, files) = {
            let mut inner = self.inner.lock();
            if inner.ended {
                return;
            }
            inner.ended = true;
            (std::mem::take(&mut inner.end_listeners), inner.files.clone())
        };
        for listener in listeners {
            listener(files.clone());
        }
    }

    /// Subscribe to per-file arrival. Already-buffered files replay
    /// synchronously before the subscription is stored.
    pub fn on_data(&self, mut listener: impl FnMut(SharedFile) + Send + 'static) {
        let mut inner = self.inner.lock();
        for file in inner.files.clone() {
            listener(file);
        }
        inner.data_listeners.push(Box::new(listener));
    }

    /// Subscribe to termination. On an ended list the listener runs
    /// immediately with the final files.
    pub fn on_end(&self, listener: impl FnOnce(Vec<SharedFile>) + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.ended {
            let files = inner.files.clone();
            drop(inner);
            listener(files);
        } else {
            inner.end_listeners.push(Box::new(listener));
        }
    }

    pub fn ended(&self) -> bool {
        self.inner.lock().ended
    }

    pub fn files(&self) -> Vec<SharedFile> {
        self.inner.lock().files.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().files.is_empty()
    }

    /// Linear scan by target-path equality.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<SharedFile> {
        let wanted = self.engine.resolve(path);
        self.inner
            .lock()
            .files
            .iter()
            .find(|f| pathx::path_equals(&f.lock().dest_path(), &wanted))
            .cloned()
    }

    // --- pipe -----------------------------------------------------------

    /// Adapt a processor into a derived list.
    pub fn pipe(&self, processor: Processor) -> Result<FileList> {
        self.pipe_with(processor, PipeOptions::default())
    }

    /// Like [`FileList::pipe`], with options handed to the stage.
    pub fn pipe_with(&self, processor: Processor, options: PipeOptions) -> Result<FileList> {
        let name = processor.default_name().to_string();
        self.pipe_arc(Arc::new(processor), name, options)
    }

    fn pipe_arc(
        &self,
        mut processor: Arc<Processor>,
        mut name: String,
        options: PipeOptions,
    ) -> Result<FileList> {
        // Resolve registry aliases, with a guard against cycles.
        let mut depth = 0;
        loop {
            let alias = match &*processor {
                Processor::Named(alias) => alias.clone(),
                _ => break,
            };
            depth += 1;
            if depth > 8 {
                return Err(Error::ProcessorNotFound(format!("{} (alias cycle)", alias)));
            }
            processor = self.engine.resolve_processor(&alias)?;
            name = alias;
        }

        match &*processor {
            Processor::Downstream(list) => {
                let out = list.clone();
                self.forward_into(&out);
                Ok(out)
            }
            Processor::Factory(factory) => {
                let out = factory(&options);
                self.forward_into(&out);
                Ok(out)
            }
            Processor::Sync(_) | Processor::Async(_) => {
                Ok(self.pipe_per_file(processor, name, options))
            }
            Processor::WholeList(_) | Processor::Emitter(_) => {
                Ok(self.pipe_whole_list(processor, name, options))
            }
            Processor::Named(_) => unreachable!("aliases resolved above"),
        }
    }

    /// Forward every file into an existing list and wire `end`.
    fn forward_into(&self, out: &FileList) {
        let forward = out.clone();
        self.on_data(move |file| forward.add(file));
        let terminate = out.clone();
        self.on_end(move |_| terminate.end());
    }

    /// Per-file stage: load, process, then emit downstream. The pending
    /// counter (one per file, plus one for the upstream `end`) gates the
    /// downstream `end`.
    fn pipe_per_file(
        &self,
        processor: Arc<Processor>,
        name: String,
        options: PipeOptions,
    ) -> FileList {
        let out = FileList::new(self.engine.clone());
        let pending = Arc::new(AtomicUsize::new(1));
        let cx = PipeContext {
            engine: self.engine.clone(),
            options,
            name,
        };

        {
            let out = out.clone();
            let pending = pending.clone();
            let cx = cx.clone();
            self.on_data(move |file| {
                pending.fetch_add(1, Ordering::SeqCst);
                let id = cx.engine.barrier().begin(&cx.name);
                let out = out.clone();
                let pending = pending.clone();
                let processor = processor.clone();
                let cx = cx.clone();
                tokio::spawn(async move {
                    let _ = File::load(&file).await;
                    run_processor(&processor, &file, &cx).await;
                    out.add(file);
                    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        out.end();
                    }
                    cx.engine.barrier().end(id);
                });
            });
        }
        {
            let out = out.clone();
            self.on_end(move |_| {
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    out.end();
                }
            });
        }
        out
    }

    /// Whole-list stage: wait for the upstream `end`, then handle files
    /// one at a time in upstream order.
    fn pipe_whole_list(
        &self,
        processor: Arc<Processor>,
        name: String,
        options: PipeOptions,
    ) -> FileList {
        let out = FileList::new(self.engine.clone());
        let cx = PipeContext {
            engine: self.engine.clone(),
            options,
            name,
        };

        let downstream = out.clone();
        self.on_end(move |files| {
            let id = cx.engine.barrier().begin(&cx.name);
            tokio::spawn(async move {
                match &*processor {
                    Processor::WholeList(f) => {
                        for (index, file) in files.iter().enumerate() {
                            let _ = File::load(file).await;
                            let outcome =
                                AssertUnwindSafe(f(file.clone(), index, cx.clone()))
                                    .catch_unwind()
                                    .await;
                            attach_outcome(outcome, file, &cx);
                            downstream.add(file.clone());
                        }
                        downstream.end();
                    }
                    Processor::Emitter(f) => {
                        for file in &files {
                            let _ = File::load(file).await;
                        }
                        let outcome = AssertUnwindSafe(f(
                            files.clone(),
                            downstream.clone(),
                            cx.clone(),
                        ))
                        .catch_unwind()
                        .await;
                        let result = match outcome {
                            Ok(r) => r,
                            Err(_) => Err(Error::Processor {
                                name: cx.name.clone(),
                                message: "processor panicked".to_string(),
                            }),
                        };
                        if let Err(e) = result {
                            cx.engine.record_error();
                            LogEntry::error(e.to_string())
                                .with_plugin(cx.name.clone())
                                .emit();
                        }
                        downstream.end();
                    }
                    _ => {}
                }
                cx.engine.barrier().end(id);
            });
        });
        out
    }

    // --- built-in stages ------------------------------------------------

    /// Derived list containing only files matching the patterns.
    pub fn src(&self, patterns: &[&str]) -> Result<FileList> {
        let matcher = Matcher::from_patterns(patterns, self.engine.cwd())?;
        let out = FileList::new(self.engine.clone());
        {
            let out = out.clone();
            self.on_data(move |file| {
                let matched = file.lock().matches(&matcher);
                if matched {
                    out.add(file);
                }
            });
        }
        {
            let out = out.clone();
            self.on_end(move |_| out.end());
        }
        Ok(out)
    }

    /// Union of this list, loose files, and other lists. Files are added
    /// immediately; completion gates on every input list ending.
    pub fn concat(&self, others: impl IntoIterator<Item = ConcatSource>) -> FileList {
        let out = FileList::new(self.engine.clone());
        let others: Vec<ConcatSource> = others.into_iter().collect();
        let list_count = 1 + others
            .iter()
            .filter(|o| matches!(o, ConcatSource::List(_)))
            .count();
        let remaining = Arc::new(AtomicUsize::new(list_count));

        wire_concat(self, &out, &remaining);
        for other in others {
            match other {
                ConcatSource::File(file) => out.add(file),
                ConcatSource::List(list) => wire_concat(&list, &out, &remaining),
            }
        }
        out
    }

    /// Save each file under `target` and forward it once the save
    /// completes.
    pub fn dest(&self, target: impl Into<DestTarget>) -> FileList {
        let target = target.into();
        let processor = Processor::Async(Box::new(move |file, _cx| {
            let target = target.clone();
            Box::pin(async move {
                let dir = match &target {
                    DestTarget::Dir(dir) => dir.clone(),
                    DestTarget::Select(select) => {
                        let guard = file.lock();
                        select(&guard)
                    }
                };
                File::save(&file, Some(&dir)).await
            })
        }));
        self.pipe_per_file(Arc::new(processor), "dest".to_string(), PipeOptions::default())
    }

    /// Delete each file's source and forward it once the delete
    /// completes.
    pub fn delete(&self, remove_empty_dirs: bool) -> FileList {
        let processor = Processor::Async(Box::new(move |file, _cx| {
            Box::pin(async move { File::delete(&file, remove_empty_dirs).await })
        }));
        self.pipe_per_file(Arc::new(processor), "delete".to_string(), PipeOptions::default())
    }
}

fn wire_concat(list: &FileList, out: &FileList, remaining: &Arc<AtomicUsize>) {
    {
        let out = out.clone();
        list.on_data(move |file| out.add(file));
    }
    {
        let out = out.clone();
        let remaining = remaining.clone();
        list.on_end(move |_| {
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                out.end();
            }
        });
    }
}

/// Run a per-file processor, converting failures (including panics) into
/// diagnostics on the file.
async fn run_processor(processor: &Processor, file: &SharedFile, cx: &PipeContext) {
    let outcome: std::result::Result<Result<()>, _> = match processor {
        Processor::Sync(f) => {
            let file = file.clone();
            let cx2 = cx.clone();
            catch_unwind(AssertUnwindSafe(move || {
                let mut guard = file.lock();
                f(&mut guard, &cx2)
            }))
        }
        Processor::Async(f) => {
            AssertUnwindSafe(f(file.clone(), cx.clone()))
                .catch_unwind()
                .await
        }
        _ => Ok(Ok(())),
    };
    attach_outcome(outcome, file, cx);
}

fn attach_outcome(
    outcome: std::result::Result<Result<()>, Box<dyn std::any::Any + Send>>,
    file: &SharedFile,
    cx: &PipeContext,
) {
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(Error::Processor {
            name: cx.name.clone(),
            message: "processor panicked".to_string(),
        }),
    };
    if let Err(e) = result {
        file.lock()
            .error(LogEntry::error(e.to_string()).with_plugin(cx.name.clone()));
    }
}

impl std::fmt::Debug for FileList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FileList")
            .field("files", &inner.files.len())
            .field("ended", &inner.ended)
            .field("data_listeners", &inner.data_listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use tempfile::TempDir;

    fn test_engine(dir: &TempDir) -> Engine {
        Engine::new(EngineOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
    }

    #[test]
    fn test_late_data_subscriber_replays() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), None));
        list.add(engine.file(None, Some(PathBuf::from("b.txt")), None));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        list.on_data(move |file| sink.lock().push(file.lock().path().to_path_buf()));
        assert_eq!(
            *seen.lock(),
            vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]
        );
    }

    #[test]
    fn test_late_end_subscriber_fires_immediately() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), None));
        list.end();

        let got = Arc::new(Mutex::new(None));
        let sink = got.clone();
        list.on_end(move |files| *sink.lock() = Some(files.len()));
        assert_eq!(*got.lock(), Some(1));
    }

    #[test]
    fn test_end_fires_once() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        list.on_end(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        list.end();
        list.end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_by_path() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("sub/a.txt")), None));
        assert!(list.get("sub/a.txt").is_some());
        assert!(list.get("missing.txt").is_none());
    }

    #[tokio::test]
    async fn test_pipe_sync_transforms_files() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), Some("hi".into())));
        list.end();

        let out = list
            .pipe(Processor::sync_fn(|file, _cx| {
                let text = file.content()?.to_uppercase();
                file.set_content(text);
                Ok(())
            }))
            .unwrap();
        engine.idle().await;

        assert!(out.ended());
        assert_eq!(out.len(), 1);
        assert_eq!(out.files()[0].lock().content().unwrap(), "HI");
    }

    #[tokio::test]
    async fn test_pipe_error_attaches_to_file() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), Some("hi".into())));
        list.end();

        let out = list
            .pipe(Processor::sync_fn(|_file, cx| {
                Err(Error::Processor {
                    name: cx.name.clone(),
                    message: "nope".to_string(),
                })
            }))
            .unwrap();
        engine.idle().await;

        // The file still flows downstream; the error is attached.
        assert_eq!(out.len(), 1);
        assert_eq!(out.files()[0].lock().error_count(), 1);
        assert_eq!(engine.error_count(), 1);
    }

    #[tokio::test]
    async fn test_pipe_panic_is_caught() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), Some("hi".into())));
        list.end();

        let out = list
            .pipe(Processor::sync_fn(|_file, _cx| panic!("boom")))
            .unwrap();
        engine.idle().await;
        assert_eq!(out.len(), 1);
        assert_eq!(out.files()[0].lock().error_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_pipeline_still_ends() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.end();

        let out = list
            .pipe(Processor::sync_fn(|_f, _cx| Ok(())))
            .unwrap();
        engine.idle().await;
        assert!(out.ended());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_src_filters() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), None));
        list.add(engine.file(None, Some(PathBuf::from("b.js")), None));
        list.end();

        let txt = list.src(&["*.txt"]).unwrap();
        assert!(txt.ended());
        assert_eq!(txt.len(), 1);
    }

    #[tokio::test]
    async fn test_concat_merges_and_gates_end() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let a = FileList::new(engine.clone());
        let b = FileList::new(engine.clone());
        a.add(engine.file(None, Some(PathBuf::from("a.txt")), None));
        a.end();

        let merged = a.concat(vec![
            ConcatSource::from(engine.file(None, Some(PathBuf::from("loose.txt")), None)),
            ConcatSource::from(b.clone()),
        ]);
        assert!(!merged.ended());

        b.add(engine.file(None, Some(PathBuf::from("b.txt")), None));
        b.end();
        assert!(merged.ended());
        assert_eq!(merged.len(), 3);
    }

    #[tokio::test]
    async fn test_whole_list_preserves_upstream_order() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        for name in ["b.txt", "a.txt", "c.txt"] {
            list.add(engine.file(None, Some(PathBuf::from(name)), Some("x".into())));
        }
        list.end();

        let out = list
            .pipe(Processor::whole_list(|file, _index, _cx| {
                Box::pin(async move {
                    let mut guard = file.lock();
                    let upper = guard.path().to_string_lossy().to_uppercase();
                    guard.set_path(upper);
                    Ok(())
                })
            }))
            .unwrap();
        engine.idle().await;

        let names: Vec<PathBuf> = out
            .files()
            .iter()
            .map(|f| f.lock().path().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("B.TXT"),
                PathBuf::from("A.TXT"),
                PathBuf::from("C.TXT")
            ]
        );
    }

    #[tokio::test]
    async fn test_emitter_controls_emission() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        for name in ["a.txt", "b.txt", "c.txt"] {
            list.add(engine.file(None, Some(PathBuf::from(name)), Some("x".into())));
        }
        list.end();

        // Keep only the first file.
        let out = list
            .pipe(Processor::emitter(|files, downstream, _cx| {
                Box::pin(async move {
                    if let Some(first) = files.into_iter().next() {
                        downstream.add(first);
                    }
                    Ok(())
                })
            }))
            .unwrap();
        engine.idle().await;

        assert!(out.ended());
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_named_processor_resolution() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        engine.register_processor(
            "upper",
            Processor::sync_fn(|file, _cx| {
                let text = file.content()?.to_uppercase();
                file.set_content(text);
                Ok(())
            }),
        );

        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), Some("hi".into())));
        list.end();

        let out = list.pipe(Processor::named("upper")).unwrap();
        engine.idle().await;
        assert_eq!(out.files()[0].lock().content().unwrap(), "HI");
    }

    #[tokio::test]
    async fn test_unknown_named_processor_errors() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let list = FileList::new(engine.clone());
        list.end();
        assert!(matches!(
            list.pipe(Processor::named("missing")),
            Err(Error::ProcessorNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_downstream_forwarding() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let sink = FileList::new(engine.clone());

        let list = FileList::new(engine.clone());
        list.add(engine.file(None, Some(PathBuf::from("a.txt")), None));
        list.end();

        let out = list.pipe(Processor::downstream(sink.clone())).unwrap();
        assert_eq!(out.len(), 1);
        assert!(sink.ended());
    }
}
