//! The `rill preview` command.

use std::time::Instant;

use rill_core::WorkMode;

use crate::cli::BuildArgs;
use crate::error::Result;

/// Count what a build would do without touching the disk.
pub async fn execute(args: BuildArgs) -> Result<i32> {
    let started = Instant::now();
    let session = super::setup(&args, WorkMode::Preview)?;

    super::run_pipelines(&session.engine, &session.pipelines).await?;

    super::summary(&session.engine, started, "previewed");
    Ok(session.engine.exit_code())
}
