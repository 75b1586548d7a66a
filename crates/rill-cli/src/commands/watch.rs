//! The `rill watch` command.
//!
//! Builds once, then maps file-system events through the dependency
//! tracker: a change to a file some source *depends on* re-runs the
//! pipelines covering that source; a change to a merely *referenced* file
//! only reloads and re-emits the referring sources, with no
//! re-transformation.

use std::path::PathBuf;
use std::time::Instant;

use rill_core::{Engine, File, Matcher, WorkMode};

use crate::cli::BuildArgs;
use crate::config::ResolvedPipeline;
use crate::error::Result;
use crate::watcher::{FileChange, FileWatcher};

struct WatchedPipeline {
    matcher: Matcher,
    pipeline: ResolvedPipeline,
}

/// Build, then keep rebuilding affected pipeline segments on change.
pub async fn execute(args: BuildArgs) -> Result<i32> {
    let started = Instant::now();
    let session = super::setup(&args, WorkMode::Watch)?;
    let engine = session.engine;

    engine.load_state();
    super::run_pipelines(&engine, &session.pipelines).await?;
    engine.save_state()?;
    super::summary(&engine, started, "built");

    let mut watched = Vec::with_capacity(session.pipelines.len());
    for pipeline in &session.pipelines {
        let patterns: Vec<&str> = pipeline.src.iter().map(String::as_str).collect();
        let matcher = Matcher::from_patterns(&patterns, engine.cwd())
            .map_err(crate::error::CliError::Engine)?;
        watched.push(WatchedPipeline {
            matcher,
            pipeline: pipeline.clone(),
        });
    }

    let ignores = session.config.watch_ignores(&session.pipelines);
    let debounce = session.config.watch_debounce_ms.unwrap_or(150);
    let (watcher, mut changes) =
        FileWatcher::new(engine.cwd().to_path_buf(), &ignores, debounce)?;
    tracing::info!("watching {}", watcher.root().display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => {
                let Some(change) = change else { break };
                handle_change(&engine, &watched, change).await?;
            }
        }
    }

    engine.save_state()?;
    Ok(engine.exit_code())
}

async fn handle_change(
    engine: &Engine,
    watched: &[WatchedPipeline],
    change: FileChange,
) -> Result<()> {
    let path = change.path().to_path_buf();
    tracing::debug!("changed: {}", path.display());

    // Sources that must be fully rebuilt because they depend on the
    // changed file, plus the changed file itself when a pipeline covers
    // it directly.
    let rebuild_sources = engine.dependents_of(&path);
    let rerun: Vec<&WatchedPipeline> = watched
        .iter()
        .filter(|wp| {
            wp.matcher.matches_path(&path)
                || rebuild_sources.iter().any(|src| wp.matcher.matches_path(src))
        })
        .collect();

    if !rerun.is_empty() {
        // Edges are re-recorded during reprocessing.
        engine.clear_deps_for(&path);
        for src in &rebuild_sources {
            engine.clear_deps_for(src);
        }
        let affected: Vec<ResolvedPipeline> =
            rerun.iter().map(|wp| wp.pipeline.clone()).collect();
        super::run_pipelines(engine, &affected).await?;
        engine.save_state()?;
        tracing::info!("rebuilt after {}", path.display());
        return Ok(());
    }

    // Reference edges get a content-only refresh: reload from disk and
    // re-emit, skipping the processor chain.
    let refresh_sources = engine.referrers_of(&path);
    if refresh_sources.is_empty() {
        return Ok(());
    }
    for src in refresh_sources {
        refresh_source(engine, watched, &src).await?;
    }
    engine.save_state()?;
    tracing::info!("refreshed after {}", path.display());
    Ok(())
}

async fn refresh_source(
    engine: &Engine,
    watched: &[WatchedPipeline],
    src: &PathBuf,
) -> Result<()> {
    for wp in watched {
        if !wp.matcher.matches_path(src) {
            continue;
        }
        let Some(dest) = &wp.pipeline.dest else { continue };
        let file = engine.file(Some(src.clone()), None, None);
        File::load(&file).await.map_err(crate::error::CliError::Engine)?;
        let dest = engine.resolve(dest);
        File::save(&file, Some(&dest))
            .await
            .map_err(crate::error::CliError::Engine)?;
    }
    Ok(())
}
