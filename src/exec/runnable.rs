// src/exec/runnable.rs

//! The four pipeline actions behind one cancel-aware contract.
//!
//! A [`Runnable`] is started once per pipeline iteration. `start` spawns a
//! driver task and hands back two signals:
//!
//! - `ready`: fires at most once; `true` means the next action in the chain
//!   may start, `false` aborts the chain for this iteration.
//! - `done`: the driver's join handle. It resolves only after the owned
//!   process group has been released (process reaped, output pumps drained,
//!   stdin unsubscribed). The engine must collect every `done` before
//!   beginning the next iteration.
//!
//! All variants share the same preamble: spawn through the process
//! primitive, subscribe stdin, start output pumps, and feed the final exit
//! status through a `proc` channel that the driver always drains before
//! returning.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::EXIT_SPAWN;
use crate::exec::process::{pump_pipe, spawn_shell, ProcHandle, ProcRx, SpawnedProcess};
use crate::exec::stdin::StdinHub;
use crate::sync::Latch;

/// Everything a driver needs from the environment, cloned per start.
#[derive(Clone)]
pub struct RunContext {
    pub shell: String,
    pub exit_wait: Duration,
    pub stdin: StdinHub,
}

impl RunContext {
    pub fn new(config: &Config, stdin: StdinHub) -> Self {
        Self {
            shell: config.shell.clone(),
            exit_wait: config.exit_wait,
            stdin,
        }
    }
}

/// One scheduled action in the pipeline.
#[derive(Debug, Clone)]
pub enum Runnable {
    /// Run a command and wait for it; readiness is its exit status.
    RunWait { command: String },
    /// Start a daemon; readiness is a fixed startup delay.
    DaemonTimer { command: String, period: Duration },
    /// Start a daemon; readiness is a substring appearing on its output.
    DaemonTrigger { command: String, trigger: String },
    /// Open a URL in the browser; readiness is a successful spawn.
    BrowserOpen { url: String },
}

/// Handles to one in-flight Runnable invocation.
pub struct RunningAction {
    pub ready: oneshot::Receiver<bool>,
    pub done: JoinHandle<()>,
}

impl Runnable {
    /// Start the action. The returned signals follow the contract described
    /// in the module docs; `kill` is the iteration's one-shot cancel signal.
    pub fn start(&self, ctx: &RunContext, kill: Latch) -> RunningAction {
        let (ready_tx, ready_rx) = oneshot::channel();
        let ctx = ctx.clone();

        let done = match self {
            Runnable::RunWait { command } => {
                tokio::spawn(run_wait(ctx, command.clone(), kill, ready_tx))
            }
            Runnable::DaemonTimer { command, period } => {
                tokio::spawn(daemon_timer(ctx, command.clone(), *period, kill, ready_tx))
            }
            Runnable::DaemonTrigger { command, trigger } => tokio::spawn(daemon_trigger(
                ctx,
                command.clone(),
                trigger.clone(),
                kill,
                ready_tx,
            )),
            Runnable::BrowserOpen { url } => {
                tokio::spawn(browser_open(ctx, url.clone(), kill, ready_tx))
            }
        };

        RunningAction {
            ready: ready_rx,
            done,
        }
    }
}

impl fmt::Display for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runnable::RunWait { command } => write!(f, "cmd `{command}`"),
            Runnable::DaemonTimer { command, period } => {
                write!(f, "daemon `{command}` (timer {}ms)", period.as_millis())
            }
            Runnable::DaemonTrigger { command, trigger } => {
                write!(f, "daemon `{command}` (trigger {trigger:?})")
            }
            Runnable::BrowserOpen { url } => write!(f, "open {url}"),
        }
    }
}

/// How child output is pumped to our stdio.
enum OutputMode {
    Plain,
    /// Scan for `needle` and fire `matched` on the first occurrence, then
    /// fall back to bulk forwarding.
    Trigger { needle: String, matched: Latch },
}

/// A launched child: the handle for killing plus the exit-status channel.
struct ActiveProc {
    handle: ProcHandle,
    proc_rx: ProcRx,
}

/// Common preamble for all variants: spawn, subscribe stdin, start pumps,
/// and start the waiter that delivers the exit status after both pumps have
/// drained (so `done` implies no more output from this child).
///
/// A spawn failure is an unrecoverable environment problem (wrong --shell,
/// broken pipes) and terminates the process.
async fn launch(
    ctx: &RunContext,
    command: &str,
    subscribe_stdin: bool,
    mode: OutputMode,
) -> ActiveProc {
    let spawned = match spawn_shell(&ctx.shell, command) {
        Ok(spawned) => spawned,
        Err(err) => {
            error!(command = %command, error = ?err, "cannot start command");
            std::process::exit(EXIT_SPAWN);
        }
    };

    let SpawnedProcess {
        handle,
        mut child,
        stdin,
        stdout,
        stderr,
    } = spawned;

    if subscribe_stdin {
        ctx.stdin.subscribe(handle.id, stdin).await;
    }

    let (proc_tx, proc_rx) = mpsc::channel(1);
    let hub = ctx.stdin.clone();
    let id = handle.id;

    tokio::spawn(async move {
        let (out_pump, err_pump) = match mode {
            OutputMode::Plain => (
                tokio::spawn(pump_pipe(stdout, tokio::io::stdout(), "stdout")),
                tokio::spawn(pump_pipe(stderr, tokio::io::stderr(), "stderr")),
            ),
            OutputMode::Trigger { needle, matched } => (
                tokio::spawn(watch_pump(
                    stdout,
                    tokio::io::stdout(),
                    needle.clone(),
                    matched.clone(),
                    "stdout",
                )),
                tokio::spawn(watch_pump(
                    stderr,
                    tokio::io::stderr(),
                    needle,
                    matched,
                    "stderr",
                )),
            ),
        };

        // Both pumps must reach EOF before the exit status is announced;
        // once `done` is observed no further output from this child can
        // interleave with the next iteration.
        let _ = out_pump.await;
        let _ = err_pump.await;

        if subscribe_stdin {
            hub.unsubscribe(id).await;
        }

        let _ = proc_tx.send(child.wait().await).await;
    });

    ActiveProc { handle, proc_rx }
}

/// Wait until the waiter has delivered the exit status and closed `proc`.
/// Drivers must not return (and thereby signal `done`) before this.
async fn drain(proc_rx: &mut ProcRx) {
    while proc_rx.recv().await.is_some() {}
}

fn exit_ok(handle: &ProcHandle, status: Option<std::io::Result<ExitStatus>>) -> bool {
    match status {
        Some(Ok(st)) if st.success() => true,
        Some(Ok(st)) => {
            error!(command = %handle.name, status = %st, "command failed");
            false
        }
        Some(Err(err)) => {
            error!(command = %handle.name, error = %err, "error waiting for command");
            false
        }
        None => false,
    }
}

/// A daemon exiting at all is suspicious; tell the user either way.
fn report_daemon_exit(handle: &ProcHandle, status: Option<std::io::Result<ExitStatus>>) {
    match status {
        Some(Ok(st)) if st.success() => {
            warn!(command = %handle.name, "daemon exited cleanly");
        }
        Some(Ok(st)) => {
            error!(command = %handle.name, status = %st, "daemon exited");
        }
        Some(Err(err)) => {
            error!(command = %handle.name, error = %err, "error waiting for daemon");
        }
        None => {}
    }
}

/// RunWait: build and post-start steps. Readiness is the exit status; a
/// cancellation before exit kills the group and emits no readiness at all.
async fn run_wait(ctx: RunContext, command: String, kill: Latch, ready: oneshot::Sender<bool>) {
    info!(command = %command, "running command, waiting");

    let ActiveProc {
        mut handle,
        mut proc_rx,
    } = launch(&ctx, &command, true, OutputMode::Plain).await;

    tokio::select! {
        status = proc_rx.recv() => {
            let _ = ready.send(exit_ok(&handle, status));
        }
        _ = kill.fired() => {
            handle.kill(&mut proc_rx, ctx.exit_wait).await;
        }
    }

    drain(&mut proc_rx).await;
}

/// DaemonTimer: readiness after a fixed startup delay, unless the daemon
/// exits (startup failure) or the iteration is cancelled first.
async fn daemon_timer(
    ctx: RunContext,
    command: String,
    period: Duration,
    kill: Latch,
    ready: oneshot::Sender<bool>,
) {
    info!(command = %command, "starting daemon");

    let ActiveProc {
        mut handle,
        mut proc_rx,
    } = launch(&ctx, &command, true, OutputMode::Plain).await;

    debug!(ms = period.as_millis() as u64, "waiting on daemon startup timer");

    tokio::select! {
        _ = tokio::time::sleep(period) => {
            debug!(command = %handle.name, "daemon timer done");
            let _ = ready.send(true);

            // Readiness has been announced; all that is left is to observe
            // an unexpected exit or the iteration's cancellation.
            tokio::select! {
                status = proc_rx.recv() => report_daemon_exit(&handle, status),
                _ = kill.fired() => handle.kill(&mut proc_rx, ctx.exit_wait).await,
            }
        }
        status = proc_rx.recv() => {
            // Exited before the timer: startup failed.
            report_daemon_exit(&handle, status);
            let _ = ready.send(false);
        }
        _ = kill.fired() => {
            handle.kill(&mut proc_rx, ctx.exit_wait).await;
        }
    }

    drain(&mut proc_rx).await;
}

/// DaemonTrigger: readiness when the trigger string appears on stdout or
/// stderr. Same policy as the timer variant otherwise.
async fn daemon_trigger(
    ctx: RunContext,
    command: String,
    trigger: String,
    kill: Latch,
    ready: oneshot::Sender<bool>,
) {
    info!(command = %command, trigger = %trigger, "starting daemon");

    let matched = Latch::new();
    let ActiveProc {
        mut handle,
        mut proc_rx,
    } = launch(
        &ctx,
        &command,
        true,
        OutputMode::Trigger {
            needle: trigger.clone(),
            matched: matched.clone(),
        },
    )
    .await;

    tokio::select! {
        _ = matched.fired() => {
            debug!(command = %handle.name, "daemon trigger matched");
            let _ = ready.send(true);

            tokio::select! {
                status = proc_rx.recv() => report_daemon_exit(&handle, status),
                _ = kill.fired() => handle.kill(&mut proc_rx, ctx.exit_wait).await,
            }
        }
        status = proc_rx.recv() => {
            // Exited before the trigger appeared: startup failed.
            report_daemon_exit(&handle, status);
            let _ = ready.send(false);
        }
        _ = kill.fired() => {
            handle.kill(&mut proc_rx, ctx.exit_wait).await;
        }
    }

    drain(&mut proc_rx).await;
}

/// Forward an output pipe while scanning for the trigger; after the first
/// match (on either pipe) forwarding continues in bulk.
async fn watch_pump<R, W>(mut from: R, mut to: W, needle: String, matched: Latch, label: &str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut scanner = TriggerScanner::new(needle.as_bytes());
    let mut buf = [0u8; 8192];

    loop {
        match from.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => {
                if let Err(err) = to.write_all(&buf[..n]).await {
                    debug!(pipe = label, error = %err, "pipe write error");
                    return;
                }
                let _ = to.flush().await;

                if !matched.is_fired() && scanner.push(&buf[..n]) {
                    matched.fire();
                }
            }
            Err(err) => {
                debug!(pipe = label, error = %err, "pipe read error");
                return;
            }
        }
    }
}

/// Rolling-window substring scanner. A read can end mid-trigger, so the tail
/// of the previous chunk (needle length - 1 bytes) is kept and rescanned
/// together with the next chunk. First match wins; the scanner goes inert
/// afterwards.
struct TriggerScanner {
    needle: Vec<u8>,
    tail: Vec<u8>,
    matched: bool,
}

impl TriggerScanner {
    fn new(needle: &[u8]) -> Self {
        Self {
            needle: needle.to_vec(),
            tail: Vec::new(),
            matched: false,
        }
    }

    /// Feed a chunk; returns true once the needle has been seen.
    fn push(&mut self, chunk: &[u8]) -> bool {
        if self.matched {
            return true;
        }
        if self.needle.is_empty() {
            self.matched = true;
            return true;
        }

        self.tail.extend_from_slice(chunk);
        if self
            .tail
            .windows(self.needle.len())
            .any(|w| w == self.needle.as_slice())
        {
            self.matched = true;
            self.tail.clear();
            return true;
        }

        // Keep only what could still be a prefix of a match.
        let keep = self.needle.len() - 1;
        if self.tail.len() > keep {
            self.tail.drain(..self.tail.len() - keep);
        }
        false
    }
}

#[cfg(target_os = "macos")]
const CHROME_APPLESCRIPT: &str = r#"
  tell application "Google Chrome"
    activate
    set theUrl to "%URL%"

    if (count every window) = 0 then
      make new window
    end if

    set found to false
    set theTabIndex to -1
    repeat with theWindow in every window
      set theTabIndex to 0
      repeat with theTab in every tab of theWindow
        set theTabIndex to theTabIndex + 1
        if theTab's URL = theUrl then
          set found to true
          exit
        end if
      end repeat

      if found then
        exit repeat
      end if
    end repeat

    if found then
      tell theTab to reload
      set theWindow's active tab index to theTabIndex
      set index of theWindow to 1
    else
      tell window 1 to make new tab with properties {URL:theUrl}
    end if
  end tell
"#;

/// BrowserOpen: a terminal action. Readiness is simply a successful spawn;
/// the exit is then handled like RunWait. The browser never takes broadcast
/// stdin.
#[cfg(not(target_os = "macos"))]
async fn browser_open(ctx: RunContext, url: String, kill: Latch, ready: oneshot::Sender<bool>) {
    info!(url = %url, "opening url (OS agnostic, this may not work)");

    let command = format!("google-chrome \"{url}\"");
    let ActiveProc {
        mut handle,
        mut proc_rx,
    } = launch(&ctx, &command, false, OutputMode::Plain).await;

    let _ = ready.send(true);

    tokio::select! {
        status = proc_rx.recv() => {
            exit_ok(&handle, status);
        }
        _ = kill.fired() => {
            handle.kill(&mut proc_rx, ctx.exit_wait).await;
        }
    }

    drain(&mut proc_rx).await;
}

/// BrowserOpen on macOS: pipe an AppleScript to `osascript` that reuses (or
/// creates) a Chrome tab for the URL.
#[cfg(target_os = "macos")]
async fn browser_open(ctx: RunContext, url: String, kill: Latch, ready: oneshot::Sender<bool>) {
    info!(url = %url, "opening url (macos/chrome)");

    let script = CHROME_APPLESCRIPT.replace("%URL%", &url);
    let command = format!("osascript <<'WATCHRUN_EOF'\n{script}\nWATCHRUN_EOF");
    let ActiveProc {
        mut handle,
        mut proc_rx,
    } = launch(&ctx, &command, false, OutputMode::Plain).await;

    let _ = ready.send(true);

    tokio::select! {
        status = proc_rx.recv() => {
            exit_ok(&handle, status);
        }
        _ = kill.fired() => {
            handle.kill(&mut proc_rx, ctx.exit_wait).await;
        }
    }

    drain(&mut proc_rx).await;
}
