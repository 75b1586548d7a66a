//! Terminal logging setup.

use rill_core::LogLevel;

/// Install the global subscriber according to the verbosity flags.
/// A `RILL_LOG` filter directive in the environment wins over both.
pub fn init(verbose: bool, quiet: bool) {
    rill_core::init_logging_from_env(LogLevel::from_flags(verbose, quiet));
}
