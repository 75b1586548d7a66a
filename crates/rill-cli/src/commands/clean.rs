//! The `rill clean` command.

use rill_core::WorkMode;

use crate::cli::BuildArgs;
use crate::error::Result;

/// Delete exactly the artifacts previous builds recorded in the output
/// cache, pruning directories that become empty.
pub async fn execute(args: BuildArgs) -> Result<i32> {
    let session = super::setup(&args, WorkMode::Clean)?;

    session.engine.load_state();
    let removed = session.engine.clean_tracked().await?;
    session.engine.save_state()?;

    tracing::info!("removed {} tracked artifact(s)", removed);
    Ok(session.engine.exit_code())
}
