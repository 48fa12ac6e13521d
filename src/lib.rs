// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod signal;
pub mod sync;
pub mod tls;
pub mod watch;
pub mod web;

use anyhow::Result;

use crate::cli::CliArgs;
use crate::config::Config;
use crate::engine::Engine;
use crate::exec::{RunContext, StdinHub};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - flag validation and config resolution
/// - the action chain
/// - the filesystem event source
/// - the optional web servers
/// - the stdin broadcaster
/// - signal handling
/// and then hands control to the engine until quit or a watcher error.
pub async fn run(args: CliArgs) -> Result<()> {
    let config = Config::from_args(args)?;

    let chain = engine::build_chain(&config);

    let source = watch::spawn_watch_source(&config)?;
    // The OS watcher stops when this handle drops; keep it for the whole run.
    let _watcher = source.handle;

    web::start_web_servers(&config.web).await?;

    let stdin = StdinHub::spawn(tokio::io::stdin());
    let ctx = RunContext::new(&config, stdin);

    let quit = signal::spawn_quit_handler();

    Engine::new(chain, ctx, source.events, source.errors, quit)
        .run()
        .await
}
