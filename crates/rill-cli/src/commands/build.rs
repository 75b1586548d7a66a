//! The `rill build` command.

use std::time::Instant;

use rill_core::WorkMode;

use crate::cli::BuildArgs;
use crate::error::Result;

/// Run the configured pipelines once and persist the build stores.
pub async fn execute(args: BuildArgs) -> Result<i32> {
    let started = Instant::now();
    let session = super::setup(&args, WorkMode::Build)?;

    session.engine.load_state();
    super::run_pipelines(&session.engine, &session.pipelines).await?;
    session.engine.save_state()?;

    super::summary(&session.engine, started, "built");
    Ok(session.engine.exit_code())
}
