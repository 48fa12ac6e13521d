// src/errors.rs

//! Crate-wide error types.
//!
//! Runtime errors travel as `anyhow::Error` with context (the engine treats
//! almost nothing as fatal). Startup problems are a different story: each
//! failure class carries its own process exit code so scripts wrapping
//! watchrun can tell a bad flag set from an unbindable address.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code used when the shell itself cannot be launched mid-run. This is
/// an environment problem that no amount of retrying between builds fixes.
pub const EXIT_SPAWN: i32 = 6;

#[derive(Error, Debug)]
pub enum StartupError {
    /// Invalid flag combination, unparseable regex, missing action.
    #[error("configuration error: {0}")]
    Config(String),

    /// The watch root cannot be walked or registered with the OS watcher.
    #[error("cannot watch {path}: {reason}")]
    Watch { path: PathBuf, reason: String },

    /// An `--http` / `--h2` address could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// TLS key material could not be loaded or generated.
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Config(_) => 2,
            StartupError::Watch { .. } => 3,
            StartupError::Bind { .. } => 4,
            StartupError::Tls(_) => 5,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = anyhow::Result<T>;
