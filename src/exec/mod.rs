// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`process`] owns the process primitive: spawning into a fresh process
//!   group, the escalating SIGTERM → SIGKILL kill, and the stdio pumps.
//! - [`stdin`] multiplexes terminal input to every subscribed child.
//! - [`runnable`] wraps the four pipeline actions behind the common
//!   `start(kill) -> (ready, dead)` contract.

pub mod process;
pub mod runnable;
pub mod stdin;

pub use runnable::{RunContext, Runnable, RunningAction};
pub use stdin::StdinHub;
