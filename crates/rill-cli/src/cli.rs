//! Command-line interface definition.
//!
//! clap v4 derive structs for the four working modes. The shared
//! [`BuildArgs`] carry the pattern list, output directory, and the
//! source-map toggles; `--verbose`/`--quiet` are global.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// rill - a rule-based incremental build tool
#[derive(Parser, Debug)]
#[command(
    name = "rill",
    version,
    about = "Rule-based incremental build tool",
    long_about = "rill matches source files with glob patterns, pipes them through\n\
                  processor chains, and writes the results to an output tree,\n\
                  propagating source maps and rebuilding incrementally in watch mode."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the configured pipelines once
    Build(BuildArgs),
    /// Build, then re-run affected pipelines on file changes
    Watch(BuildArgs),
    /// Delete the artifacts recorded by previous builds
    Clean(BuildArgs),
    /// Report what a build would do without writing anything
    Preview(BuildArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Source glob patterns; overrides the config file's pipelines
    pub patterns: Vec<String>,

    /// Output directory for pattern-based builds
    #[arg(long)]
    pub out_dir: Option<String>,

    /// Path to the config file (defaults to rill.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Working directory
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Allow saving a file over its own source
    #[arg(long)]
    pub overwrite: bool,

    /// Force source-map emission on
    #[arg(long, conflicts_with = "no_source_map")]
    pub source_map: bool,

    /// Disable source-map emission
    #[arg(long)]
    pub no_source_map: bool,

    /// Inline maps as data: URIs instead of sibling .map files
    #[arg(long)]
    pub inline_source_map: bool,

    /// Embed original source text in emitted maps
    #[arg(long)]
    pub sources_content: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_with_patterns() {
        let cli = Cli::try_parse_from(["rill", "build", "src/**/*.js", "--out-dir", "dist"])
            .unwrap();
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.patterns, vec!["src/**/*.js".to_string()]);
                assert_eq!(args.out_dir.as_deref(), Some("dist"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_source_map_flags_conflict() {
        assert!(Cli::try_parse_from(["rill", "build", "--source-map", "--no-source-map"]).is_err());
    }

    #[test]
    fn test_verbose_quiet_conflict() {
        assert!(Cli::try_parse_from(["rill", "-v", "-q", "build"]).is_err());
    }

    #[test]
    fn test_watch_parses() {
        let cli = Cli::try_parse_from(["rill", "watch", "--overwrite"]).unwrap();
        assert!(matches!(cli.command, Command::Watch(args) if args.overwrite));
    }
}
