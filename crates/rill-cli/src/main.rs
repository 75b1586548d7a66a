//! rill command-line entry point.

mod cli;
mod commands;
mod config;
mod error;
mod logger;
mod watcher;

use clap::Parser;

use cli::{Cli, Command};

// The engine's scheduling model is single-threaded cooperative; the
// current-thread runtime pins every stage to one logical thread.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose, cli.quiet);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> error::Result<i32> {
    match cli.command {
        Command::Build(args) => commands::build::execute(args).await,
        Command::Watch(args) => commands::watch::execute(args).await,
        Command::Clean(args) => commands::clean::execute(args).await,
        Command::Preview(args) => commands::preview::execute(args).await,
    }
}
