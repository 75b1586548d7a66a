//! The processor contract.
//!
//! A pipeline stage adapts one of several processor shapes into a uniform
//! streaming stage. The shape is declared explicitly with a tagged variant
//! instead of being sniffed from the callable: per-file processors (sync or
//! async) run as files arrive, whole-list processors wait for the upstream
//! to finish, and a stage can also forward into an existing list, build one
//! from options, or resolve a registered processor by name.

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::engine::Engine;
use crate::file::{File, SharedFile};
use crate::list::FileList;
use crate::Result;

pub type SyncFn = Box<dyn Fn(&mut File, &PipeContext) -> Result<()> + Send + Sync>;
pub type AsyncFn =
    Box<dyn Fn(SharedFile, PipeContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type SeqFn =
    Box<dyn Fn(SharedFile, usize, PipeContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type EmitFn = Box<
    dyn Fn(Vec<SharedFile>, FileList, PipeContext) -> BoxFuture<'static, Result<()>> + Send + Sync,
>;
pub type FactoryFn = Box<dyn Fn(&PipeOptions) -> FileList + Send + Sync>;

/// A pipeline stage's behaviour.
pub enum Processor {
    /// Synchronous per-file transform, run after the file is loaded.
    Sync(SyncFn),
    /// Asynchronous per-file transform. Downstream `data` fires in
    /// completion order.
    Async(AsyncFn),
    /// Whole-list transform: waits for the upstream `end`, then handles
    /// files one at a time in upstream order. The stage re-emits each file
    /// after its future resolves.
    WholeList(SeqFn),
    /// Whole-list transform that controls emission itself; files it does
    /// not add to the downstream list are dropped from the pipeline.
    Emitter(EmitFn),
    /// Forward every file into an existing list.
    Downstream(FileList),
    /// Build the downstream list from the pipe options.
    Factory(FactoryFn),
    /// Resolve a registered processor by name.
    Named(String),
}

impl Processor {
    pub fn sync_fn(f: impl Fn(&mut File, &PipeContext) -> Result<()> + Send + Sync + 'static) -> Self {
        Processor::Sync(Box::new(f))
    }

    pub fn async_fn(
        f: impl Fn(SharedFile, PipeContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    ) -> Self {
        Processor::Async(Box::new(f))
    }

    pub fn whole_list(
        f: impl Fn(SharedFile, usize, PipeContext) -> BoxFuture<'static, Result<()>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Processor::WholeList(Box::new(f))
    }

    pub fn emitter(
        f: impl Fn(Vec<SharedFile>, FileList, PipeContext) -> BoxFuture<'static, Result<()>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Processor::Emitter(Box::new(f))
    }

    pub fn downstream(list: FileList) -> Self {
        Processor::Downstream(list)
    }

    pub fn factory(f: impl Fn(&PipeOptions) -> FileList + Send + Sync + 'static) -> Self {
        Processor::Factory(Box::new(f))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Processor::Named(name.into())
    }

    /// Stage label used for progress and diagnostics.
    pub(crate) fn default_name(&self) -> &str {
        match self {
            Processor::Sync(_) | Processor::Async(_) => "pipe",
            Processor::WholeList(_) | Processor::Emitter(_) => "pipe-all",
            Processor::Downstream(_) => "forward",
            Processor::Factory(_) => "factory",
            Processor::Named(name) => name,
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Processor::Sync(_) => write!(f, "Processor::Sync"),
            Processor::Async(_) => write!(f, "Processor::Async"),
            Processor::WholeList(_) => write!(f, "Processor::WholeList"),
            Processor::Emitter(_) => write!(f, "Processor::Emitter"),
            Processor::Downstream(_) => write!(f, "Processor::Downstream"),
            Processor::Factory(_) => write!(f, "Processor::Factory"),
            Processor::Named(name) => write!(f, "Processor::Named({:?})", name),
        }
    }
}

/// Read-only options handed to a stage.
///
/// Options are frozen at pipe time; stages and plugins can only read them.
#[derive(Debug, Clone, Default)]
pub struct PipeOptions {
    value: Arc<Value>,
}

impl PipeOptions {
    pub fn new(value: Value) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}

/// Context handed to a processor for one stage.
#[derive(Clone)]
pub struct PipeContext {
    pub engine: Engine,
    pub options: PipeOptions,
    /// Stage name, used in diagnostics attached to failing files.
    pub name: String,
}

impl PipeContext {
    /// Resolve a path against the engine's working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> std::path::PathBuf {
        crate::pathx::resolve_path(self.engine.cwd(), path)
    }
}

/// Registry of named processors.
///
/// Resolution is memoized by construction: registered processors are held
/// behind `Arc` and handed out by reference count.
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: Mutex<FxHashMap<String, Arc<Processor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, processor: Processor) {
        self.entries.lock().insert(name.into(), Arc::new(processor));
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<Processor>> {
        self.entries.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_and_resolve() {
        let registry = ProcessorRegistry::new();
        assert!(registry.is_empty());
        registry.register("upper", Processor::sync_fn(|_, _| Ok(())));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("upper").is_some());
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn test_options_are_shared_and_read_only() {
        let options = PipeOptions::new(serde_json::json!({"level": "max", "strict": true}));
        let copy = options.clone();
        assert_eq!(copy.get_str("level"), Some("max"));
        assert_eq!(copy.get_bool("strict"), Some(true));
        assert!(copy.get("missing").is_none());
    }

    #[test]
    fn test_default_names() {
        assert_eq!(Processor::sync_fn(|_, _| Ok(())).default_name(), "pipe");
        assert_eq!(Processor::named("minify").default_name(), "minify");
    }
}
