//! Build output setup.
//!
//! The engine reports everything through `tracing`: diagnostics at their
//! severity, task begin/end pairs at debug. Embedders install whatever
//! subscriber they like; applications call [`init_logging`] (or the
//! `RILL_LOG`-aware [`init_logging_from_env`]) for a compact stderr
//! format.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// How much build output to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Nothing at all.
    Silent,
    /// Failures only.
    Errors,
    /// Failures and warnings.
    Warnings,
    /// Per-run summaries and watch notifications (the default).
    #[default]
    Progress,
    /// Per-task detail.
    Verbose,
}

impl LogLevel {
    /// Derive a level from the usual `--verbose`/`--quiet` flag pair.
    /// `verbose` wins when both are set.
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            LogLevel::Verbose
        } else if quiet {
            LogLevel::Errors
        } else {
            LogLevel::Progress
        }
    }

    fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Silent => LevelFilter::OFF,
            LogLevel::Errors => LevelFilter::ERROR,
            LogLevel::Warnings => LevelFilter::WARN,
            LogLevel::Progress => LevelFilter::INFO,
            LogLevel::Verbose => LevelFilter::DEBUG,
        }
    }
}

/// Install a compact stderr subscriber at the given level.
///
/// Idempotent: once a global subscriber exists, later calls do nothing,
/// so tests and embedders can both call it freely.
pub fn init_logging(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level.to_filter())
        .with_target(false)
        .without_time()
        .compact()
        .with_writer(std::io::stderr)
        .try_init();
}

/// Like [`init_logging`], but a `RILL_LOG` environment variable holding a
/// tracing filter directive (e.g. `debug` or `rill_core=trace`) takes
/// precedence over `fallback`.
pub fn init_logging_from_env(fallback: LogLevel) {
    match std::env::var("RILL_LOG") {
        Ok(directive) if !directive.is_empty() => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(directive))
                .with_target(false)
                .without_time()
                .compact()
                .with_writer(std::io::stderr)
                .try_init();
        }
        _ => init_logging(fallback),
    }
}
