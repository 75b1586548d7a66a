//! # rill-core
//!
//! Rule-based incremental build engine. Builds are described as pipelines:
//! a source set is matched by patterns, piped through an ordered chain of
//! processors, and written to an output tree. The engine coordinates
//! asynchronous I/O through a task barrier, propagates source maps across
//! transformations, caches what it wrote, and — in watch mode — re-runs
//! only the pipeline segments affected by a change.
//!
//! ## Quick start
//!
//! ```no_run
//! use rill_core::{Engine, Processor};
//!
//! # #[tokio::main]
//! # async fn main() -> rill_core::Result<()> {
//! let engine = Engine::with_defaults();
//!
//! engine
//!     .src(&["src/**/*.txt"])?
//!     .pipe(Processor::sync_fn(|file, _cx| {
//!         let text = file.content()?.to_uppercase();
//!         file.set_content(text);
//!         Ok(())
//!     }))?
//!     .dest("out");
//!
//! engine.idle().await;
//! std::process::exit(engine.exit_code());
//! # }
//! ```

pub mod barrier;
pub mod cache;
pub mod deps;
pub mod diagnostic;
pub mod engine;
pub mod exec;
pub mod file;
pub mod fsx;
pub mod list;
pub mod logging;
pub mod matcher;
pub mod pathx;
pub mod processor;
pub mod sourcemap;
pub mod urlx;

pub use barrier::{Continuation, TaskBarrier, TaskHold, TaskId};
pub use cache::OutputCache;
pub use deps::DependencyTracker;
pub use diagnostic::{LogEntry, Severity};
pub use engine::{Engine, EngineOptions, Hooks, SourceMapOptions, WorkMode};
pub use file::{Encoding, File, FileData, Location, SharedFile};
pub use list::{ConcatSource, DestTarget, FileList};
pub use logging::{init_logging, init_logging_from_env, LogLevel};
pub use matcher::Matcher;
pub use processor::{PipeContext, PipeOptions, Processor};
pub use sourcemap::{SourceLocation, SourceMapBuilder, SourceMapData, SourceMapObject};

use std::path::PathBuf;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the file-system capability.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output file already exists and overwrite is disabled.
    #[error("output exists: {}", .0.display())]
    OutputExists(PathBuf),

    /// A processor reported a failure for the file it was handling.
    #[error("processor '{name}' failed: {message}")]
    Processor { name: String, message: String },

    /// A named processor could not be resolved through the registry.
    #[error("processor not found: {0}")]
    ProcessorNotFound(String),

    /// Invalid glob pattern.
    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// Source-map data could not be parsed or composed.
    #[error("invalid source map: {0}")]
    SourceMap(String),

    /// Text could not be represented in the requested encoding.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Persisted store could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
