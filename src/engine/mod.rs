// src/engine/mod.rs

//! The pipeline engine.
//!
//! [`build_chain`] turns the configuration into the immutable ordered
//! sequence of [`Runnable`]s; [`pipeline::Engine`] drives it: drain stale
//! events, arm the event observer, run the chain, tear everything down, and
//! go again.

pub mod pipeline;

pub use pipeline::Engine;

use std::time::Duration;

use crate::config::Config;
use crate::exec::runnable::Runnable;

/// Assemble the action chain in pipeline order: build step, daemon,
/// post-start step, browser. Built once; never mutated at runtime.
pub fn build_chain(config: &Config) -> Vec<Runnable> {
    let mut chain = Vec::new();

    if let Some(command) = &config.build_cmd {
        chain.push(Runnable::RunWait {
            command: command.clone(),
        });
    }

    if let Some(command) = &config.daemon_cmd {
        match &config.daemon_trigger {
            Some(trigger) => chain.push(Runnable::DaemonTrigger {
                command: command.clone(),
                trigger: trigger.clone(),
            }),
            // A daemon without a timer gets period 0: ready right after
            // spawn, but its exit is still watched and reported.
            None => chain.push(Runnable::DaemonTimer {
                command: command.clone(),
                period: Duration::from_millis(config.daemon_timer),
            }),
        }
    }

    if let Some(command) = &config.post_cmd {
        chain.push(Runnable::RunWait {
            command: command.clone(),
        });
    }

    if let Some(url) = &config.url {
        chain.push(Runnable::BrowserOpen { url: url.clone() });
    }

    chain
}
