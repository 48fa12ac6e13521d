// src/watch/watcher.rs

use std::path::PathBuf;

use anyhow::anyhow;
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::errors::StartupError;

/// The live event source handed to the engine.
///
/// Dropping `handle` stops file watching, so the caller must keep it alive
/// for as long as the engine runs.
pub struct WatchSource {
    /// String descriptions of events that matched the watch regex.
    pub events: mpsc::Receiver<String>,
    /// Watcher errors; the engine treats these as fatal.
    pub errors: mpsc::UnboundedReceiver<anyhow::Error>,
    pub handle: WatcherHandle,
}

/// Keeps the underlying `RecommendedWatcher` alive.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Walk the watch root, register directories, and spawn the forwarding task
/// that matches raw events against the watch regex.
pub fn spawn_watch_source(config: &Config) -> Result<WatchSource, StartupError> {
    if !config.dir.is_dir() {
        return Err(StartupError::Watch {
            path: config.dir.clone(),
            reason: "not a directory".to_string(),
        });
    }

    // Channel from the blocking notify callback into the async world.
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
    let (err_tx, errors) = mpsc::unbounded_channel::<anyhow::Error>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = raw_tx.send(event);
            }
            Err(err) => {
                let _ = err_tx.send(anyhow!(err).context("file watch error"));
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|err| StartupError::Watch {
        path: config.dir.clone(),
        reason: err.to_string(),
    })?;

    register_dirs(&mut watcher, config)?;

    // Async task that stringifies events and forwards the matches.
    let (event_tx, events) = mpsc::channel::<String>(64);
    let watch_regex = config.watch_regex.clone();
    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            for desc in describe_event(&event) {
                if watch_regex.is_match(&desc) {
                    if event_tx.send(desc).await.is_err() {
                        return;
                    }
                } else {
                    debug!(event = %desc, "ignored event");
                }
            }
        }
        debug!("file watcher loop ended");
    });

    Ok(WatchSource {
        events,
        errors,
        handle: WatcherHandle { _inner: watcher },
    })
}

/// Register each directory under the root non-recursively, skipping subtrees
/// whose path matches the ignore regex. With `--recursive=false` only the
/// root itself is registered.
fn register_dirs(watcher: &mut RecommendedWatcher, config: &Config) -> Result<(), StartupError> {
    let watch_one = |watcher: &mut RecommendedWatcher, path: PathBuf| {
        debug!(dir = %path.display(), "watching dir");
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|err| StartupError::Watch {
                path,
                reason: err.to_string(),
            })
    };

    if !config.recursive {
        return watch_one(watcher, config.dir.clone());
    }

    let mut it = WalkDir::new(&config.dir).follow_links(false).into_iter();
    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path().to_path_buf();
        if config.ignore_regex.is_match(&path.to_string_lossy()) {
            debug!(dir = %path.display(), "ignoring dir");
            it.skip_current_dir();
            continue;
        }

        watch_one(watcher, path)?;
    }

    Ok(())
}

/// Render a notify event as one description per path, in the form the watch
/// regex is matched against: `"/some/path": CREATE`.
pub fn describe_event(event: &Event) -> Vec<String> {
    let op = op_name(&event.kind);
    event
        .paths
        .iter()
        .map(|path| format!("\"{}\": {}", path.display(), op))
        .collect()
}

fn op_name(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Create(_) => "CREATE",
        EventKind::Modify(ModifyKind::Name(_)) => "RENAME",
        EventKind::Modify(ModifyKind::Metadata(_)) => "CHMOD",
        EventKind::Modify(_) => "MODIFY",
        EventKind::Remove(_) => "REMOVE",
        EventKind::Access(_) => "ACCESS",
        _ => "OTHER",
    }
}
