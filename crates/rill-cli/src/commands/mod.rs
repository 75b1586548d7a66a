//! Subcommand implementations.

pub mod build;
pub mod clean;
pub mod preview;
pub mod watch;

use std::time::Instant;

use rill_core::{Engine, EngineOptions, Processor, WorkMode};

use crate::cli::BuildArgs;
use crate::config::{ResolvedPipeline, RillConfig};
use crate::error::{ConfigError, Result};

/// Everything a command needs: the configured engine and the pipelines to
/// run.
pub(crate) struct Session {
    pub engine: Engine,
    pub config: RillConfig,
    pub pipelines: Vec<ResolvedPipeline>,
}

/// Merge config file and command line (flags win) into an engine.
pub(crate) fn setup(args: &BuildArgs, mode: WorkMode) -> Result<Session> {
    let launch_dir = std::env::current_dir()?;
    let cwd = match &args.cwd {
        Some(dir) => rill_core::pathx::resolve_path(&launch_dir, dir),
        None => launch_dir,
    };

    let config = RillConfig::load(args.config.as_deref(), &cwd)?;
    let pipelines = config.resolve_pipelines(&args.patterns, args.out_dir.as_deref())?;

    let mut source_map = rill_core::SourceMapOptions::default();
    source_map.enabled = if args.no_source_map {
        false
    } else if args.source_map {
        true
    } else {
        config.source_map.unwrap_or(true)
    };
    source_map.inline = args.inline_source_map || config.inline_source_map.unwrap_or(false);
    source_map.include_sources_content =
        args.sources_content || config.sources_content.unwrap_or(false);
    source_map.source_root = config.source_root.clone();

    let encoding = match &config.encoding {
        Some(name) => name.parse().map_err(|_| ConfigError::InvalidValue {
            field: "encoding".to_string(),
            value: name.clone(),
            hint: "use utf8, utf8-lossy, or latin1".to_string(),
        })?,
        None => rill_core::Encoding::default(),
    };

    let engine = Engine::new(EngineOptions {
        cwd: Some(cwd.clone()),
        mode,
        encoding,
        overwrite: args.overwrite || config.overwrite.unwrap_or(false),
        source_map,
        cache_dir: config.resolved_cache_dir(&cwd),
        hooks: Default::default(),
    });

    Ok(Session {
        engine,
        config,
        pipelines,
    })
}

/// Run each pipeline (scan, named processors, dest) and wait for the
/// barrier to settle.
pub(crate) async fn run_pipelines(
    engine: &Engine,
    pipelines: &[ResolvedPipeline],
) -> Result<()> {
    for pipeline in pipelines {
        let patterns: Vec<&str> = pipeline.src.iter().map(String::as_str).collect();
        let mut list = engine.src(&patterns)?;
        for name in &pipeline.pipe {
            list = list.pipe(Processor::named(name))?;
        }
        if let Some(dest) = &pipeline.dest {
            let _ = list.dest(dest.as_str());
        }
    }
    engine.idle().await;
    Ok(())
}

pub(crate) fn summary(engine: &Engine, started: Instant, verb: &str) {
    tracing::info!(
        "{} {} file(s), {} error(s), {} warning(s) in {:.1?}",
        verb,
        engine.processed_count(),
        engine.error_count(),
        engine.warning_count(),
        started.elapsed()
    );
}
