// src/exec/process.rs

//! The process primitive: spawn a shell command as a new process group and
//! kill it with escalating signals.
//!
//! Every child is started as `<shell> -c <command>` with piped stdio and
//! `process_group(0)`, making the child the leader of a fresh group. Build
//! scripts routinely fork children of their own; signalling the whole group
//! (`kill(-pgid, …)`) is the only way to reclaim their ports and file
//! descriptors on restart.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Delivers the child's final exit status exactly once, then closes.
///
/// Capacity 1 so the waiter's send always succeeds; a `recv` after delivery
/// returns `None` immediately, which is what lets callers drain the channel
/// any number of times.
pub type ProcRx = mpsc::Receiver<std::io::Result<std::process::ExitStatus>>;

static NEXT_PROC_ID: AtomicU64 = AtomicU64::new(1);

/// Book-keeping for one spawned child, owned by its Runnable driver.
#[derive(Debug)]
pub struct ProcHandle {
    /// The command string, used for log context only.
    pub name: String,
    /// Key under which the child's stdin is registered with the broadcaster.
    pub id: u64,
    /// Process group id (equal to the child's pid).
    pub pgid: i32,
    /// Set once [`ProcHandle::kill`] has run; an exit after this point is
    /// intentional and not worth reporting.
    pub killed: bool,
}

/// A freshly spawned child with all three stdio pipes still attached.
pub struct SpawnedProcess {
    pub handle: ProcHandle,
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn `command` under `shell` in a new process group.
///
/// Failure here means the shell itself could not be launched or a pipe could
/// not be opened, an environment problem the caller treats as fatal.
pub fn spawn_shell(shell: &str, command: &str) -> Result<SpawnedProcess> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning `{shell} -c {command}`"))?;

    let stdin = child.stdin.take().context("stdin pipe unavailable")?;
    let stdout = child.stdout.take().context("stdout pipe unavailable")?;
    let stderr = child.stderr.take().context("stderr pipe unavailable")?;

    // The child is the group leader, so pid == pgid.
    let pgid = child.id().map(|pid| pid as i32).unwrap_or(0);

    Ok(SpawnedProcess {
        handle: ProcHandle {
            name: command.to_string(),
            id: NEXT_PROC_ID.fetch_add(1, Ordering::Relaxed),
            pgid,
            killed: false,
        },
        child,
        stdin,
        stdout,
        stderr,
    })
}

impl ProcHandle {
    /// Kill the process group with escalating signals.
    ///
    /// SIGTERM first; if the group is already gone, return quietly. Then
    /// race `exit_wait` against the process's own exit, and SIGKILL the
    /// group if the timer wins. `exit_wait` of zero skips the wait and goes
    /// straight to SIGKILL.
    pub async fn kill(&mut self, proc: &mut ProcRx, exit_wait: Duration) {
        self.killed = true;

        if self.pgid <= 0 {
            return;
        }

        info!(command = %self.name, "sending SIGTERM to process group");
        if !signal_group(self.pgid, libc::SIGTERM, &self.name) {
            return;
        }

        if exit_wait.is_zero() {
            signal_group(self.pgid, libc::SIGKILL, &self.name);
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(exit_wait) => {
                info!(command = %self.name, "still running after exitwait, sending SIGKILL");
                signal_group(self.pgid, libc::SIGKILL, &self.name);
            }
            _ = proc.recv() => {
                debug!(command = %self.name, "exited before SIGKILL escalation");
            }
        }
    }
}

/// Send `sig` to the whole group. Returns false if the group no longer
/// exists or the signal could not be delivered.
fn signal_group(pgid: i32, sig: libc::c_int, name: &str) -> bool {
    let rc = unsafe { libc::kill(-pgid, sig) };
    if rc == 0 {
        return true;
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(command = %name, "process group already gone");
    } else {
        warn!(command = %name, error = %err, "failed to signal process group");
    }
    false
}

/// Copy a child output pipe to one of our own stdio streams, chunk by chunk,
/// flushing as we go so child output appears promptly.
///
/// Read and write errors are logged and end the pump; children exiting
/// mid-write are routine, not actionable.
pub async fn pump_pipe<R, W>(mut from: R, mut to: W, label: &str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
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
            }
            Err(err) => {
                debug!(pipe = label, error = %err, "pipe read error");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_places_child_in_its_own_group() {
        let spawned = spawn_shell("/bin/sh", "sleep 5").expect("spawn");
        let pid = spawned.child.id().expect("pid") as i32;
        assert_eq!(spawned.handle.pgid, pid);

        // The child's group should differ from ours.
        let own_pgid = unsafe { libc::getpgid(0) };
        assert_ne!(spawned.handle.pgid, own_pgid);

        let child_pgid = unsafe { libc::getpgid(pid) };
        assert_eq!(child_pgid, pid);

        // Clean up.
        unsafe { libc::kill(-pid, libc::SIGKILL) };
    }

    #[tokio::test]
    async fn kill_escalates_past_sigterm_immune_children() {
        let mut spawned = spawn_shell("/bin/sh", "trap '' TERM; sleep 30").expect("spawn");

        let (proc_tx, mut proc_rx) = mpsc::channel(1);
        let mut child = spawned.child;
        tokio::spawn(async move {
            let _ = proc_tx.send(child.wait().await).await;
        });

        // Give the shell a moment to install its trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = std::time::Instant::now();
        spawned
            .handle
            .kill(&mut proc_rx, Duration::from_millis(100))
            .await;

        // Drain: the waiter must deliver an exit status promptly.
        let status = tokio::time::timeout(Duration::from_secs(2), proc_rx.recv())
            .await
            .expect("child should die after SIGKILL");
        assert!(status.is_some());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(spawned.handle.killed);
    }

    #[tokio::test]
    async fn kill_of_exited_process_returns_quietly() {
        let mut spawned = spawn_shell("/bin/sh", "true").expect("spawn");

        let (proc_tx, mut proc_rx) = mpsc::channel(1);
        let mut child = spawned.child;
        tokio::spawn(async move {
            let _ = proc_tx.send(child.wait().await).await;
        });

        // Wait for the exit status to arrive, then kill the corpse.
        let _ = proc_rx.recv().await;
        spawned
            .handle
            .kill(&mut proc_rx, Duration::from_millis(50))
            .await;
        assert!(spawned.handle.killed);
    }
}
