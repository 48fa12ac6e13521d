// src/engine/pipeline.rs

//! The main loop: drain, arm, run chain, observe kill, tear down, repeat.
//!
//! Each iteration gets a fresh one-shot `kill` latch. Exactly one task, the
//! event observer, ever fires it; every Runnable and the engine itself only
//! observe it. That single-writer discipline is what makes the protocol
//! race-free when several tasks watch the same signal.

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::exec::runnable::{RunContext, Runnable};
use crate::sync::Latch;

/// The pipeline engine. Owns the event streams while idle and lends them to
/// the per-iteration observer task while a chain is running.
pub struct Engine {
    chain: Vec<Runnable>,
    ctx: RunContext,
    events: mpsc::Receiver<String>,
    errors: mpsc::UnboundedReceiver<anyhow::Error>,
    quit: Latch,
}

impl Engine {
    /// `events` carries matched event descriptions, `errors` carries fatal
    /// watcher errors, and `quit` is fired by the signal handler.
    pub fn new(
        chain: Vec<Runnable>,
        ctx: RunContext,
        events: mpsc::Receiver<String>,
        errors: mpsc::UnboundedReceiver<anyhow::Error>,
        quit: Latch,
    ) -> Self {
        Self {
            chain,
            ctx,
            events,
            errors,
            quit,
        }
    }

    /// Run the pipeline until quit (Ok) or a watcher error (Err).
    ///
    /// Iteration protocol:
    /// 1. fresh `kill` latch;
    /// 2. drain stale events queued while the previous iteration ran;
    /// 3. arm the event observer;
    /// 4. run the chain in order, stopping on `ready=false` or `kill`;
    /// 5. block on `kill` so the loop cannot spin;
    /// 6. await every Runnable's `done`; nothing of this iteration may
    ///    outlive it;
    /// 7. return if quit fired, else go to 1.
    pub async fn run(self) -> Result<()> {
        let Engine {
            chain,
            ctx,
            mut events,
            mut errors,
            quit,
        } = self;

        info!("pipeline started");

        loop {
            let kill = Latch::new();

            drain_stale(&mut events);

            let observer = tokio::spawn(observe(events, errors, quit.clone(), kill.clone()));

            let mut deaths = Vec::with_capacity(chain.len());
            for runnable in &chain {
                debug!(action = %runnable, "starting action");
                let action = runnable.start(&ctx, kill.clone());
                deaths.push(action.done);

                let proceed = tokio::select! {
                    ready = action.ready => ready.unwrap_or(false),
                    _ = kill.fired() => false,
                };
                if !proceed {
                    break;
                }
            }

            // Whether the chain completed or broke, a terminating event must
            // occur before the next iteration; only the observer fires kill.
            kill.fired().await;

            let (ev, er, failure) = observer.await.context("event observer panicked")?;
            events = ev;
            errors = er;

            // The wait-group barrier: every process of this iteration must
            // be fully dead before a new one is spawned.
            for death in deaths {
                let _ = death.await;
            }

            if let Some(err) = failure {
                return Err(err);
            }
            if quit.is_fired() {
                info!("quit requested, shutting down");
                return Ok(());
            }

            debug!("restarting action chain");
        }
    }
}

/// Non-blockingly consume whatever queued up while the previous iteration
/// was still running. Without this, a burst of editor saves would make the
/// next iteration kill itself immediately.
fn drain_stale(events: &mut mpsc::Receiver<String>) {
    while let Ok(desc) = events.try_recv() {
        debug!(event = %desc, "discarding stale event");
    }
}

/// Per-iteration event observer. Fires `kill` on exactly one of: a matched
/// event, a quit, or a watcher error (returned as fatal). Hands the streams
/// back to the engine when done.
async fn observe(
    mut events: mpsc::Receiver<String>,
    mut errors: mpsc::UnboundedReceiver<anyhow::Error>,
    quit: Latch,
    kill: Latch,
) -> (
    mpsc::Receiver<String>,
    mpsc::UnboundedReceiver<anyhow::Error>,
    Option<anyhow::Error>,
) {
    let failure = tokio::select! {
        event = events.recv() => match event {
            Some(desc) => {
                info!(event = %desc, "matched event");
                None
            }
            None if quit.is_fired() => None,
            None => Some(anyhow!("watch event stream closed unexpectedly")),
        },
        err = errors.recv() => match err {
            Some(err) => Some(err),
            None if quit.is_fired() => None,
            None => Some(anyhow!("watcher error stream closed unexpectedly")),
        },
        _ = quit.fired() => None,
    };

    kill.fire();
    (events, errors, failure)
}
