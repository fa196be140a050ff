//! Supervisor behaviour against real processes, using `sh` as the app.

#![cfg(unix)]

mod helpers;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use fob_electron::{HOT_RELOAD_MESSAGE, HotPayload, ProcessState, StartupOptions, Supervisor};
use helpers::RecordingHot;
use serial_test::serial;
use tempfile::TempDir;

fn shell(script: &str) -> StartupOptions {
    StartupOptions::default()
        .with_executable("/bin/sh")
        .with_argv(["-c", script])
        .with_kill_grace(Duration::from_secs(2))
}

fn alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[tokio::test]
#[serial]
async fn test_restart_leaves_a_single_app() {
    let supervisor = Supervisor::with_exit_handler(|_| {});

    supervisor.start(shell("sleep 30")).await.unwrap();
    let first = supervisor.pid().unwrap();
    assert!(supervisor.is_running());
    assert!(supervisor.hooked_process_exit());

    supervisor.start(shell("sleep 30")).await.unwrap();
    let second = supervisor.pid().unwrap();

    assert_ne!(first, second);
    assert!(!alive(first));
    assert!(alive(second));

    supervisor.exit().await;
    assert_eq!(supervisor.state(), ProcessState::Absent);
    assert!(!alive(second));
}

#[tokio::test]
#[serial]
async fn test_exit_terminates_grandchildren() {
    let temp = TempDir::new().unwrap();
    let pid_file = temp.path().join("grandchild.pid");
    let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

    let supervisor = Supervisor::with_exit_handler(|_| {});
    supervisor.start(shell(&script)).await.unwrap();

    assert!(wait_until(|| read_pid(&pid_file).is_some()).await);
    let grandchild = read_pid(&pid_file).unwrap();
    assert!(alive(grandchild));

    supervisor.exit().await;
    assert!(wait_until(|| !alive(grandchild)).await);
}

#[tokio::test]
#[serial]
async fn test_exit_needs_no_external_tools() {
    let temp = TempDir::new().unwrap();
    let pid_file = temp.path().join("grandchild.pid");
    let script = format!("/bin/sleep 30 & echo $! > '{}'; wait", pid_file.display());

    // Nothing can be looked up on PATH, neither by the app nor by teardown.
    let saved_path = std::env::var_os("PATH");
    unsafe { std::env::set_var("PATH", "/nonexistent") };

    let supervisor = Supervisor::with_exit_handler(|_| {});
    supervisor.start(shell(&script)).await.unwrap();
    let started = wait_until(|| read_pid(&pid_file).is_some()).await;
    supervisor.exit().await;

    match saved_path {
        Some(path) => unsafe { std::env::set_var("PATH", path) },
        None => unsafe { std::env::remove_var("PATH") },
    }

    assert!(started);
    let grandchild = read_pid(&pid_file).unwrap();
    assert!(wait_until(|| !alive(grandchild)).await);
}

#[tokio::test]
#[serial]
async fn test_exit_escalates_when_term_is_ignored() {
    let supervisor = Supervisor::with_exit_handler(|_| {});
    let options = shell("trap '' TERM; while true; do sleep 1; done")
        .with_kill_grace(Duration::from_millis(200));
    supervisor.start(options).await.unwrap();
    let pid = supervisor.pid().unwrap();

    tokio::time::timeout(Duration::from_secs(5), supervisor.exit())
        .await
        .unwrap();
    assert!(!alive(pid));
}

#[tokio::test]
#[serial]
async fn test_natural_exit_reports_code() {
    let codes = Arc::new(AtomicI32::new(-1));
    let calls = Arc::new(AtomicUsize::new(0));
    let supervisor = {
        let codes = Arc::clone(&codes);
        let calls = Arc::clone(&calls);
        Supervisor::with_exit_handler(move |code| {
            codes.store(code, Ordering::SeqCst);
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    supervisor.start(shell("exit 3")).await.unwrap();

    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1).await);
    assert_eq!(codes.load(Ordering::SeqCst), 3);
    assert_eq!(supervisor.state(), ProcessState::Absent);
}

#[tokio::test]
#[serial]
async fn test_forced_exit_does_not_report() {
    let calls = Arc::new(AtomicUsize::new(0));
    let supervisor = {
        let calls = Arc::clone(&calls);
        Supervisor::with_exit_handler(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    supervisor.start(shell("sleep 30")).await.unwrap();
    supervisor.exit().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn test_envs_reach_the_app() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("env.txt");
    let script = format!("echo \"$FOB_DEV_SERVER_URL\" > '{}'", out.display());

    let supervisor = Supervisor::with_exit_handler(|_| {});
    supervisor
        .start(shell(&script).with_env("FOB_DEV_SERVER_URL", "http://localhost:5173/"))
        .await
        .unwrap();

    assert!(wait_until(|| std::fs::read_to_string(&out).is_ok_and(|s| !s.is_empty())).await);
    assert_eq!(
        std::fs::read_to_string(&out).unwrap().trim(),
        "http://localhost:5173/"
    );
}

#[cfg(target_os = "linux")]
#[tokio::test]
#[serial]
async fn test_reload_messages_running_app() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("message.txt");
    let script = format!(
        "echo \"$NODE_CHANNEL_FD\" > '{out}.fd'; read line <&4; echo \"$line\" > '{out}'; sleep 30",
        out = out.display()
    );

    let supervisor = Supervisor::with_exit_handler(|_| {});
    let hot = RecordingHot::default();

    // Not running yet: reload starts the app.
    supervisor.reload(&hot, shell(&script)).await.unwrap();
    assert!(supervisor.is_running());
    assert!(hot.payloads.lock().is_empty());

    supervisor.reload(&hot, shell(&script)).await.unwrap();
    assert_eq!(hot.payloads.lock().as_slice(), &[HotPayload::FullReload]);

    assert!(wait_until(|| std::fs::read_to_string(&out).is_ok_and(|s| !s.is_empty())).await);
    assert_eq!(
        std::fs::read_to_string(&out).unwrap().trim(),
        serde_json::to_string(HOT_RELOAD_MESSAGE).unwrap()
    );
    let fd_file = format!("{}.fd", out.display());
    assert_eq!(std::fs::read_to_string(fd_file).unwrap().trim(), "4");

    supervisor.exit().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
#[serial]
async fn test_blocked_send_does_not_block_state_queries() {
    // The app never reads its channel, so a large message fills the socket
    // buffer and the write stalls until its timeout.
    let supervisor = Supervisor::with_exit_handler(|_| {});
    supervisor.start(shell("sleep 30")).await.unwrap();

    let sender = supervisor.clone();
    let writer = std::thread::spawn(move || sender.send(&"x".repeat(8 * 1024 * 1024)));
    std::thread::sleep(Duration::from_millis(200));

    let queried = std::time::Instant::now();
    let state = supervisor.state();
    let pid = supervisor.pid();
    let elapsed = queried.elapsed();

    assert!(writer.join().unwrap().is_err());
    supervisor.exit().await;

    assert_eq!(state, ProcessState::Running);
    assert!(pid.is_some());
    assert!(elapsed < Duration::from_millis(300), "state query waited {:?}", elapsed);
}
