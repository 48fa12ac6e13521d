//! End-to-end pipeline tests with a fake event source.
//!
//! Events are injected as pre-matched description strings, exactly what the
//! watch adapter would deliver. Child effects are observed through marker
//! files rather than captured stdout.

use std::error::Error;
use std::time::{Duration, Instant};

use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use watchrun::engine::Engine;
use watchrun::exec::{RunContext, Runnable, StdinHub};
use watchrun::sync::Latch;

type TestResult = Result<(), Box<dyn Error>>;

const FAKE_EVENT: &str = r#""/tmp/fake.txt": CREATE"#;

struct Fixture {
    events: mpsc::Sender<String>,
    errors: mpsc::UnboundedSender<watchrun::errors::Error>,
    quit: Latch,
    engine: JoinHandle<Result<(), watchrun::errors::Error>>,
    // Keeps the broadcaster's input side open for the duration of the test.
    _stdin: tokio::io::DuplexStream,
}

fn start_engine(chain: Vec<Runnable>, exit_wait: Duration) -> Fixture {
    let (stdin_input, source) = tokio::io::duplex(64);

    let ctx = RunContext {
        shell: "/bin/sh".to_string(),
        exit_wait,
        stdin: StdinHub::spawn(source),
    };

    let (event_tx, event_rx) = mpsc::channel(64);
    let (err_tx, err_rx) = mpsc::unbounded_channel();
    let quit = Latch::new();

    let engine = Engine::new(chain, ctx, event_rx, err_rx, quit.clone());
    Fixture {
        events: event_tx,
        errors: err_tx,
        quit,
        engine: tokio::spawn(engine.run()),
        _stdin: stdin_input,
    }
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

#[tokio::test]
async fn simple_rebuild_runs_once_per_event() -> TestResult {
    let dir = tempdir()?;
    let marker = dir.path().join("marker");

    let chain = vec![Runnable::RunWait {
        command: format!("echo testsimple >> {}", marker.display()),
    }];
    let fx = start_engine(chain, Duration::from_millis(50));

    // Startup iteration plus one per injected event.
    for _ in 0..3 {
        sleep(Duration::from_millis(150)).await;
        fx.events.send(FAKE_EVENT.to_string()).await?;
    }
    sleep(Duration::from_millis(150)).await;

    fx.quit.fire();
    fx.engine.await??;

    let lines = read_lines(&marker);
    assert!(
        lines.len() >= 3,
        "expected at least three runs, saw {}",
        lines.len()
    );
    assert!(lines.iter().all(|l| l == "testsimple"));
    Ok(())
}

#[tokio::test]
async fn event_flood_does_not_deadlock() -> TestResult {
    let chain = vec![Runnable::RunWait {
        command: "echo echonow > /dev/null".to_string(),
    }];
    let fx = start_engine(chain, Duration::from_millis(50));

    // Flood events as fast as the channel accepts them.
    let flood_events = fx.events.clone();
    let flooding = tokio::spawn(async move {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(500) {
            let _ = flood_events.try_send(FAKE_EVENT.to_string());
            tokio::task::yield_now().await;
        }
    });
    flooding.await?;

    fx.quit.fire();
    let start = Instant::now();
    tokio::time::timeout(Duration::from_secs(2), fx.engine)
        .await
        .expect("engine must terminate promptly after quit")??;
    assert!(start.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn queued_events_are_drained_between_iterations() -> TestResult {
    let dir = tempdir()?;
    let marker = dir.path().join("marker");

    let chain = vec![Runnable::RunWait {
        command: format!("echo run >> {}; sleep 0.3", marker.display()),
    }];
    let fx = start_engine(chain, Duration::from_millis(50));

    // Let the startup iteration get going, then queue a burst mid-run.
    sleep(Duration::from_millis(100)).await;
    for _ in 0..5 {
        fx.events.send(FAKE_EVENT.to_string()).await?;
    }

    sleep(Duration::from_millis(900)).await;
    fx.quit.fire();
    fx.engine.await??;

    // The first event of the burst kills the running step; the rest must be
    // drained before the next iteration arms, so exactly one restart happens
    // instead of five.
    assert_eq!(read_lines(&marker).len(), 2);
    Ok(())
}

#[tokio::test]
async fn post_step_waits_for_daemon_trigger() -> TestResult {
    let dir = tempdir()?;
    let marker = dir.path().join("marker");

    let chain = vec![
        Runnable::DaemonTrigger {
            command: format!(
                "echo start >> {m}; sleep 0.3; echo almost >> {m}; echo READY; sleep 10",
                m = marker.display()
            ),
            trigger: "READY".to_string(),
        },
        Runnable::RunWait {
            command: format!("echo post >> {}", marker.display()),
        },
    ];
    let fx = start_engine(chain, Duration::from_millis(50));

    sleep(Duration::from_millis(900)).await;
    fx.quit.fire();
    fx.engine.await??;

    // `post` must come only after the trigger was printed; if the post step
    // had not waited, it would precede `almost`.
    let lines = read_lines(&marker);
    assert_eq!(lines, vec!["start", "almost", "post"]);
    Ok(())
}

#[tokio::test]
async fn failing_step_stops_the_chain() -> TestResult {
    let dir = tempdir()?;
    let marker = dir.path().join("marker");

    let chain = vec![
        Runnable::RunWait {
            command: "exit 1".to_string(),
        },
        Runnable::RunWait {
            command: format!("echo nope >> {}", marker.display()),
        },
    ];
    let fx = start_engine(chain, Duration::from_millis(50));

    sleep(Duration::from_millis(200)).await;
    fx.events.send(FAKE_EVENT.to_string()).await?;
    sleep(Duration::from_millis(200)).await;

    fx.quit.fire();
    fx.engine.await??;

    assert!(
        read_lines(&marker).is_empty(),
        "the step after a failing one must never run"
    );
    Ok(())
}

#[tokio::test]
async fn restart_kills_the_previous_daemon() -> TestResult {
    let dir = tempdir()?;
    let pids = dir.path().join("pids");

    let chain = vec![Runnable::DaemonTimer {
        command: format!("echo $$ >> {}; sleep 30", pids.display()),
        period: Duration::from_millis(50),
    }];
    let fx = start_engine(chain, Duration::from_millis(50));

    sleep(Duration::from_millis(300)).await;
    fx.events.send(FAKE_EVENT.to_string()).await?;
    sleep(Duration::from_millis(300)).await;

    fx.quit.fire();
    fx.engine.await??;

    let recorded = read_lines(&pids);
    assert_eq!(recorded.len(), 2, "the event should have restarted the daemon");

    // No zombie processes: every recorded shell must be gone.
    for pid in recorded {
        let pid: i32 = pid.trim().parse()?;
        let rc = unsafe { libc::kill(pid, 0) };
        assert_eq!(rc, -1, "process {pid} should have been killed");
    }
    Ok(())
}

#[tokio::test]
async fn kill_escalates_past_sigterm_immune_commands() -> TestResult {
    let dir = tempdir()?;
    let marker = dir.path().join("marker");

    // The shell ignores SIGTERM and respawns its sleep forever, so only the
    // SIGKILL escalation can take the group down.
    let chain = vec![Runnable::RunWait {
        command: format!(
            "trap '' TERM; echo started >> {}; while :; do sleep 1; done",
            marker.display()
        ),
    }];
    let fx = start_engine(chain, Duration::from_millis(100));

    sleep(Duration::from_millis(300)).await;
    fx.events.send(FAKE_EVENT.to_string()).await?;
    sleep(Duration::from_millis(500)).await;

    assert_eq!(
        read_lines(&marker).len(),
        2,
        "the restart should have killed the immune command and re-run it"
    );

    fx.quit.fire();
    let start = Instant::now();
    tokio::time::timeout(Duration::from_secs(3), fx.engine)
        .await
        .expect("engine must terminate after quit even with immune children")??;
    assert!(start.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[tokio::test]
async fn quit_during_a_running_step_tears_it_down() -> TestResult {
    let chain = vec![Runnable::RunWait {
        command: "sleep 30".to_string(),
    }];
    let fx = start_engine(chain, Duration::from_millis(50));

    sleep(Duration::from_millis(200)).await;
    fx.quit.fire();

    tokio::time::timeout(Duration::from_secs(2), fx.engine)
        .await
        .expect("quit must interrupt a running step")??;
    Ok(())
}

#[tokio::test]
async fn watcher_error_is_fatal() -> TestResult {
    let chain = vec![Runnable::DaemonTimer {
        command: "sleep 30".to_string(),
        period: Duration::from_millis(10),
    }];
    let fx = start_engine(chain, Duration::from_millis(50));

    sleep(Duration::from_millis(200)).await;
    let _ = fx
        .errors
        .send(watchrun::errors::Error::msg("inotify fell over"));

    let result = tokio::time::timeout(Duration::from_secs(2), fx.engine)
        .await
        .expect("watcher errors must end the engine")?;
    assert!(result.is_err());
    Ok(())
}
