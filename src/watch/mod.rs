// src/watch/mod.rs

//! Filesystem event source.
//!
//! Wraps the cross-platform `notify` watcher: walks the configured tree,
//! registers every directory that survives the ignore regex, and turns raw
//! events into their string form (`"/path/to/file": CREATE`) matched against
//! the watch regex. Matches flow to the engine; misses are logged and
//! discarded.
//!
//! This module knows nothing about the pipeline; it only produces matched
//! event descriptions and watcher errors.

pub mod watcher;

pub use watcher::{spawn_watch_source, WatchSource};
