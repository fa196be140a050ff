//! Supervision of the running Electron app.
//!
//! At most one app runs per [`Supervisor`]. Starting a new one terminates the
//! previous process tree first, and the tool mirrors the app's exit code when
//! the user closes the app window.

mod channel;
mod runtime;
mod tree;

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::host::{HotChannel, HotPayload};
use crate::{Error, Result};

use channel::ControlChannel;
use tree::{ProcessTree, TreeSignal};

pub use channel::CHILD_CHANNEL_FD;
pub use runtime::{
    DEFAULT_RUNTIME_PACKAGE, OVERRIDE_DIST_ENV, find_package_dir, resolve_runtime_executable,
};

/// Arguments the app is started with by default.
pub const DEFAULT_ARGV: [&str; 2] = [".", "--no-sandbox"];

/// Message the app receives on its control channel when a rebuilt preload
/// script should be picked up.
pub const HOT_RELOAD_MESSAGE: &str = "fob-electron&type=hot-reload";

/// Environment variable carrying the dev server URL into the app.
pub const DEV_SERVER_URL_ENV: &str = "FOB_DEV_SERVER_URL";

const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// How to launch the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupOptions {
    pub argv: Vec<String>,
    /// npm package providing the runtime binary.
    pub runtime_package: String,
    /// Skip package resolution and run this binary.
    pub executable: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub envs: Vec<(String, String)>,
    /// How long the tree gets to exit after SIGTERM before it is killed.
    pub kill_grace: Duration,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            argv: DEFAULT_ARGV.iter().map(|s| s.to_string()).collect(),
            runtime_package: DEFAULT_RUNTIME_PACKAGE.to_string(),
            executable: None,
            cwd: None,
            envs: Vec::new(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl StartupOptions {
    pub fn with_argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_runtime_package(mut self, package: impl Into<String>) -> Self {
        self.runtime_package = package.into();
        self
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn resolve_executable(&self) -> Result<PathBuf> {
        if let Some(executable) = &self.executable {
            return Ok(executable.clone());
        }
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };
        resolve_runtime_executable(&self.runtime_package, &cwd)
    }
}

/// Observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Absent,
    Running,
    Terminating,
}

/// Called with the app's exit code when it exits on its own.
pub type ExitHandler = Arc<dyn Fn(i32) + Send + Sync>;

type TerminateRequest = oneshot::Sender<()>;

struct RunningApp {
    pid: u32,
    channel: Option<Arc<ControlChannel>>,
    terminate: oneshot::Sender<TerminateRequest>,
}

enum Slot {
    Absent,
    Running(RunningApp),
    Terminating,
}

struct Inner {
    /// Serializes start/exit so a new app never overlaps the old one.
    ops: tokio::sync::Mutex<()>,
    slot: Arc<Mutex<Slot>>,
    hooked_process_exit: AtomicBool,
    on_exit: ExitHandler,
}

/// Owner of the single running app process.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

static GLOBAL: OnceLock<Supervisor> = OnceLock::new();

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

impl Supervisor {
    /// A supervisor that exits the tool with the app's code when the app exits.
    pub fn new() -> Self {
        Self::with_exit_handler(|code| std::process::exit(code))
    }

    pub fn with_exit_handler(on_exit: impl Fn(i32) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                ops: tokio::sync::Mutex::new(()),
                slot: Arc::new(Mutex::new(Slot::Absent)),
                hooked_process_exit: AtomicBool::new(false),
                on_exit: Arc::new(on_exit),
            }),
        }
    }

    /// The process-wide supervisor.
    pub fn global() -> &'static Supervisor {
        GLOBAL.get_or_init(Supervisor::new)
    }

    pub fn state(&self) -> ProcessState {
        match &*self.inner.slot.lock() {
            Slot::Absent => ProcessState::Absent,
            Slot::Running(_) => ProcessState::Running,
            Slot::Terminating => ProcessState::Terminating,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Pid of the running app.
    pub fn pid(&self) -> Option<u32> {
        match &*self.inner.slot.lock() {
            Slot::Running(app) => Some(app.pid),
            _ => None,
        }
    }

    /// Whether the shutdown-signal hook has been installed.
    pub fn hooked_process_exit(&self) -> bool {
        self.inner.hooked_process_exit.load(Ordering::SeqCst)
    }

    /// Start the app, terminating any previous instance first.
    pub async fn start(&self, options: StartupOptions) -> Result<()> {
        let resolve_options = options.clone();
        let executable = tokio::task::spawn_blocking(move || resolve_options.resolve_executable())
            .await
            .map_err(|e| Error::RuntimeNotFound {
                package: options.runtime_package.clone(),
                reason: e.to_string(),
            })??;

        let _op = self.inner.ops.lock().await;
        self.exit_locked().await;

        let mut command = std::process::Command::new(&executable);
        command
            .args(&options.argv)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        // Own process group, so teardown reaches every helper the app forks.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.envs(options.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let pending = channel::prepare(&mut command)
            .map_err(|e| Error::Ipc(format!("failed to create control channel: {}", e)))?;

        let child = tokio::process::Command::from(command)
            .spawn()
            .map_err(|source| Error::Spawn {
                executable: executable.clone(),
                source,
            })?;
        let channel = pending.map(|pending| Arc::new(pending.into_channel()));

        let pid = child.id().ok_or_else(|| Error::Spawn {
            executable: executable.clone(),
            source: std::io::Error::other("process has no pid"),
        })?;

        let (terminate, terminate_rx) = oneshot::channel();
        *self.inner.slot.lock() = Slot::Running(RunningApp {
            pid,
            channel,
            terminate,
        });

        tokio::spawn(watch_child(
            child,
            pid,
            terminate_rx,
            Arc::clone(&self.inner.slot),
            Arc::clone(&self.inner.on_exit),
            options.kill_grace,
        ));

        info!(pid, "started {}", executable.display());
        drop(_op);

        self.hook_process_exit();
        Ok(())
    }

    /// Terminate the app and its whole process tree. Resolves once the OS has
    /// reported the exit. No-op when nothing runs.
    pub async fn exit(&self) {
        let _op = self.inner.ops.lock().await;
        self.exit_locked().await;
    }

    async fn exit_locked(&self) {
        let app = {
            let mut slot = self.inner.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Terminating) {
                Slot::Running(app) => app,
                other => {
                    *slot = other;
                    return;
                }
            }
        };

        let RunningApp {
            pid,
            channel,
            terminate,
        } = app;
        drop(channel);

        let (done, done_rx) = oneshot::channel();
        if terminate.send(done).is_ok() {
            // The watcher replies after the child has been reaped.
            let _ = done_rx.await;
        }

        *self.inner.slot.lock() = Slot::Absent;
        info!(pid, "electron app stopped");
    }

    /// Send `message` to the app over its control channel. No-op when nothing
    /// runs or the platform has no control channel.
    ///
    /// The write happens outside the slot lock, so a slow reader never blocks
    /// state queries or teardown.
    pub fn send(&self, message: &str) -> Result<()> {
        let (pid, channel) = {
            let slot = self.inner.slot.lock();
            let Slot::Running(app) = &*slot else {
                debug!("no running app, dropping message {:?}", message);
                return Ok(());
            };
            let Some(channel) = &app.channel else {
                debug!("app has no control channel, dropping message {:?}", message);
                return Ok(());
            };
            (app.pid, Arc::clone(channel))
        };
        channel
            .send(message)
            .map_err(|e| Error::Ipc(format!("failed to send to pid {}: {}", pid, e)))
    }

    /// Reload a running app in place, or start it.
    pub async fn reload(&self, hot: &dyn HotChannel, options: StartupOptions) -> Result<()> {
        if self.is_running() {
            hot.send(HotPayload::FullReload);
            self.send(HOT_RELOAD_MESSAGE)
        } else {
            self.start(options).await
        }
    }

    /// Install the Ctrl+C / SIGTERM hook that tears the app down before the
    /// tool exits. Installed at most once per supervisor.
    pub fn hook_process_exit(&self) {
        if self.inner.hooked_process_exit.swap(true, Ordering::SeqCst) {
            return;
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            let code = shutdown_signal().await;
            info!("received shutdown signal, stopping electron app");
            supervisor.exit().await;
            std::process::exit(code);
        });
    }
}

async fn watch_child(
    mut child: Child,
    pid: u32,
    mut terminate: oneshot::Receiver<TerminateRequest>,
    slot: Arc<Mutex<Slot>>,
    on_exit: ExitHandler,
    grace: Duration,
) {
    tokio::select! {
        status = child.wait() => {
            let ours = {
                let mut slot = slot.lock();
                match &*slot {
                    Slot::Running(app) if app.pid == pid => {
                        *slot = Slot::Absent;
                        true
                    }
                    _ => false,
                }
            };
            // A concurrent exit() owns the teardown; stay quiet.
            if !ours {
                return;
            }
            let code = exit_code(status);
            info!(pid, code, "electron app exited");
            on_exit(code);
        }
        request = &mut terminate => {
            terminate_tree(&mut child, pid, grace).await;
            if let Ok(done) = request {
                let _ = done.send(());
            }
        }
    }
}

async fn terminate_tree(child: &mut Child, pid: u32, grace: Duration) {
    let tree = tokio::task::spawn_blocking(move || {
        let tree = ProcessTree::snapshot(pid);
        tree.signal(TreeSignal::Terminate);
        tree
    })
    .await
    .unwrap_or_else(|e| {
        warn!("process tree snapshot failed: {}", e);
        ProcessTree::group(pid)
    });

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => debug!(pid, ?status, "electron app terminated"),
        Err(_) => {
            warn!(pid, "electron app did not exit within {:?}, killing", grace);
            let _ = tokio::task::spawn_blocking(move || tree.signal(TreeSignal::Kill)).await;
            if let Err(e) = child.kill().await {
                warn!(pid, "failed to kill electron app: {}", e);
            }
        }
    }
}

fn exit_code(status: std::io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status.code().unwrap_or_else(|| signal_exit_code(&status)),
        Err(e) => {
            warn!("failed to wait for electron app: {}", e);
            1
        }
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| 128 + signal).unwrap_or(1)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &ExitStatus) -> i32 {
    1
}

async fn shutdown_signal() -> i32 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => 130,
                    _ = term.recv() => 143,
                }
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                130
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        130
    }
}

/// Start the app through the process-wide supervisor.
pub async fn startup(options: StartupOptions) -> Result<()> {
    Supervisor::global().start(options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_startup_options() {
        let options = StartupOptions::default();
        assert_eq!(options.argv, vec![".", "--no-sandbox"]);
        assert_eq!(options.runtime_package, "electron");
        assert!(options.executable.is_none());
    }

    #[test]
    fn test_explicit_executable_skips_resolution() {
        let options = StartupOptions::default().with_executable("/opt/app/electron");
        assert_eq!(
            options.resolve_executable().unwrap(),
            PathBuf::from("/opt/app/electron")
        );
    }

    #[tokio::test]
    async fn test_exit_and_send_are_noops_when_absent() {
        let supervisor = Supervisor::with_exit_handler(|_| {});
        supervisor.exit().await;
        supervisor.send("hello").unwrap();
        assert_eq!(supervisor.state(), ProcessState::Absent);
        assert!(!supervisor.hooked_process_exit());
    }

    #[tokio::test]
    async fn test_missing_runtime_package_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::with_exit_handler(|_| {});
        let err = supervisor
            .start(StartupOptions::default().with_cwd(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RuntimeNotFound { .. }));
        assert_eq!(supervisor.state(), ProcessState::Absent);
    }
}
