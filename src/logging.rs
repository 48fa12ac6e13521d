// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `-v` (debug) / `-q` (warn) CLI flags
//! 2. `WATCHRUN_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`

use anyhow::Result;
use tracing_subscriber::fmt;

use crate::cli::CliArgs;

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(args: &CliArgs) -> Result<()> {
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else if args.quiet {
        tracing::Level::WARN
    } else {
        env_level().unwrap_or(tracing::Level::INFO)
    };

    fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

/// `WATCHRUN_LOG` fallback for runs without `-v`/`-q`. `tracing::Level`
/// already parses the usual level names; anything unparseable is ignored.
fn env_level() -> Option<tracing::Level> {
    std::env::var("WATCHRUN_LOG").ok()?.trim().parse().ok()
}
