// src/signal.rs

//! OS termination signals → engine-wide quit.
//!
//! The first SIGINT or SIGTERM fires the returned latch. The engine's event
//! observer treats quit like a matched event (it ends the current iteration)
//! and the engine returns cleanly once teardown completes.

use tracing::{info, warn};

use crate::sync::Latch;

pub fn spawn_quit_handler() -> Latch {
    let quit = Latch::new();
    let fire = quit.clone();

    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler, interrupt only");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, shutting down after teardown");
                    fire.fire();
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down after teardown");
            }
            _ = sigterm.recv() => {
                info!("termination signal received, shutting down after teardown");
            }
        }
        fire.fire();
    });

    quit
}
