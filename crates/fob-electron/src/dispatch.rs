//! Build dispatch for the host's serve and build commands.
//!
//! In dev, every entry is built once the dev server listens, concurrently and
//! in watch mode. A close hook appended to each entry counts completed passes;
//! when all entries have completed, the app is started (or the entry's
//! `on_start` callback runs). In a production build, entries are built one
//! after another once the host's own bundle has been written.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{
    apply_base_default, apply_build_defaults, apply_serve_defaults, resolve_electron_config,
    with_external_builtins,
};
use crate::host::{CloseBundleHook, Command, ConfigEnv, DevServer, HostPlugin, HotChannel};
use crate::options::{ElectronOptions, InlineConfig, OnStart};
use crate::pipeline::{BuildPipeline, RolldownPipeline};
use crate::placeholder::{PlaceholderEntry, resolve_input};
use crate::supervisor::{DEV_SERVER_URL_ENV, StartupOptions, Supervisor};
use crate::{Error, Result};

/// Counts completed bundling passes across the entries of one plugin.
///
/// The first round is complete when every entry has finished once. The count
/// is never lowered afterwards, so every later pass (a watch rebuild of any
/// entry) completes a round on its own.
#[derive(Debug)]
pub struct CompletionCounter {
    total: usize,
    completed: AtomicUsize,
}

impl CompletionCounter {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
        }
    }

    /// Record one completed pass; `true` when the threshold is reached.
    pub fn complete(&self) -> bool {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1 >= self.total
    }

    pub fn reset(&self) {
        self.completed.store(0, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// What an `on_start` callback can do with the app.
#[derive(Clone)]
pub struct OnStartContext {
    supervisor: Supervisor,
    hot: Arc<dyn HotChannel>,
    dev_server_url: Option<String>,
}

impl std::fmt::Debug for OnStartContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnStartContext")
            .field("supervisor", &self.supervisor)
            .field("dev_server_url", &self.dev_server_url)
            .finish_non_exhaustive()
    }
}

impl OnStartContext {
    pub fn new(
        supervisor: Supervisor,
        hot: Arc<dyn HotChannel>,
        dev_server_url: Option<String>,
    ) -> Self {
        Self {
            supervisor,
            hot,
            dev_server_url,
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn dev_server_url(&self) -> Option<&str> {
        self.dev_server_url.as_deref()
    }

    /// Default startup options, carrying the dev server URL.
    pub fn startup_options(&self) -> StartupOptions {
        self.with_dev_server_url(StartupOptions::default())
    }

    fn with_dev_server_url(&self, mut options: StartupOptions) -> StartupOptions {
        let already_set = options.envs.iter().any(|(key, _)| key == DEV_SERVER_URL_ENV);
        if let (Some(url), false) = (&self.dev_server_url, already_set) {
            options
                .envs
                .push((DEV_SERVER_URL_ENV.to_string(), url.clone()));
        }
        options
    }

    /// Start (or restart) the app.
    pub async fn startup(&self, options: StartupOptions) -> Result<()> {
        self.supervisor.start(self.with_dev_server_url(options)).await
    }

    /// Reload the renderer of a running app, or start it.
    pub async fn reload(&self) -> Result<()> {
        self.supervisor
            .reload(self.hot.as_ref(), self.startup_options())
            .await
    }
}

/// Close hook counting completions and starting the app at the threshold.
struct StartupStage {
    label: String,
    counter: Arc<CompletionCounter>,
    on_start: Option<OnStart>,
    context: OnStartContext,
}

#[async_trait]
impl CloseBundleHook for StartupStage {
    fn name(&self) -> &str {
        "fob-electron:startup"
    }

    async fn close_bundle(&self) -> Result<()> {
        if !self.counter.complete() {
            debug!(
                entry = %self.label,
                completed = self.counter.count(),
                total = self.counter.total(),
                "waiting for remaining entries"
            );
            return Ok(());
        }

        match &self.on_start {
            Some(on_start) => on_start(self.context.clone()).await,
            None => {
                self.context
                    .startup(self.context.startup_options())
                    .await
            }
        }
    }
}

struct DevShared {
    entries: Mutex<Vec<ElectronOptions>>,
    pipeline: Arc<dyn BuildPipeline>,
    supervisor: Supervisor,
    counter: Arc<CompletionCounter>,
    builds: Mutex<Vec<(String, JoinHandle<Result<()>>)>>,
}

impl DevShared {
    fn on_listening(&self, server: &dyn DevServer) {
        let context = OnStartContext::new(
            self.supervisor.clone(),
            server.hot(),
            server.resolved_url(),
        );
        info!(
            url = context.dev_server_url().unwrap_or("<unknown>"),
            entries = self.counter.total(),
            "dev server listening, building electron entries"
        );

        self.counter.reset();

        let mut entries = self.entries.lock();
        let mut builds = self.builds.lock();
        for options in entries.iter_mut() {
            apply_serve_defaults(options, server.config());

            let label = options.label();
            let mut entry = options.clone();
            entry.config.close_bundle.push(Arc::new(StartupStage {
                label: label.clone(),
                counter: Arc::clone(&self.counter),
                on_start: options.on_start.clone(),
                context: context.clone(),
            }));

            let config = with_external_builtins(resolve_electron_config(&entry));
            let pipeline = Arc::clone(&self.pipeline);
            let task_label = label.clone();
            let handle = tokio::spawn(async move {
                let result = pipeline.build(config).await;
                if let Err(e) = &result {
                    error!(entry = %task_label, "electron build failed: {}", e);
                }
                result
            });
            builds.push((label, handle));
        }
    }
}

/// Dev (serve) half of the plugin.
#[derive(Clone)]
pub struct DevPlugin {
    shared: Arc<DevShared>,
}

impl std::fmt::Debug for DevPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevPlugin")
            .field("entries", &self.shared.counter.total())
            .field("completed", &self.shared.counter.count())
            .finish_non_exhaustive()
    }
}

impl DevPlugin {
    pub fn new(
        entries: Vec<ElectronOptions>,
        pipeline: Arc<dyn BuildPipeline>,
        supervisor: Supervisor,
    ) -> Self {
        let counter = Arc::new(CompletionCounter::new(entries.len()));
        Self {
            shared: Arc::new(DevShared {
                entries: Mutex::new(entries),
                pipeline,
                supervisor,
                counter,
                builds: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Snapshot of the entries, with the defaults applied so far.
    pub fn entries(&self) -> Vec<ElectronOptions> {
        self.shared.entries.lock().clone()
    }

    pub fn completion_count(&self) -> usize {
        self.shared.counter.count()
    }

    /// Wait for every build dispatched so far and report the first failure.
    pub async fn settle(&self) -> Result<()> {
        let builds: Vec<_> = self.shared.builds.lock().drain(..).collect();
        let mut first_error = None;
        for (label, handle) in builds {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::Build {
                    entry: label,
                    message: format!("build task failed: {}", e),
                }),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl HostPlugin for DevPlugin {
    fn name(&self) -> &str {
        "fob-electron"
    }

    fn apply(&self) -> Option<Command> {
        Some(Command::Serve)
    }

    fn configure_server(&self, server: Arc<dyn DevServer>) {
        let shared = Arc::clone(&self.shared);
        let listening = Arc::clone(&server);
        server.once_listening(Box::new(move || {
            Box::pin(async move {
                shared.on_listening(listening.as_ref());
            })
        }));
    }
}

#[derive(Default)]
struct BuildState {
    user_config: Option<InlineConfig>,
    env: Option<ConfigEnv>,
    placeholder: Option<PlaceholderEntry>,
}

/// Production build half of the plugin.
pub struct BuildPlugin {
    entries: tokio::sync::Mutex<Vec<ElectronOptions>>,
    pipeline: Arc<dyn BuildPipeline>,
    state: Mutex<BuildState>,
}

impl std::fmt::Debug for BuildPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BuildPlugin")
            .field("env", &state.env)
            .field("placeholder", &state.placeholder)
            .finish_non_exhaustive()
    }
}

impl BuildPlugin {
    pub fn new(entries: Vec<ElectronOptions>, pipeline: Arc<dyn BuildPipeline>) -> Self {
        Self {
            entries: tokio::sync::Mutex::new(entries),
            pipeline,
            state: Mutex::new(BuildState::default()),
        }
    }

    /// Path of the placeholder entry, while it exists.
    pub fn placeholder_path(&self) -> Option<std::path::PathBuf> {
        self.state
            .lock()
            .placeholder
            .as_ref()
            .map(|placeholder| placeholder.path().to_path_buf())
    }
}

#[async_trait]
impl HostPlugin for BuildPlugin {
    fn name(&self) -> &str {
        "fob-electron"
    }

    fn apply(&self) -> Option<Command> {
        Some(Command::Build)
    }

    fn config(&self, config: &mut InlineConfig, env: &ConfigEnv) {
        {
            let mut state = self.state.lock();
            state.user_config = Some(config.clone());
            state.env = Some(env.clone());
        }
        apply_base_default(config);
    }

    async fn config_resolved(&self, config: &InlineConfig) -> Result<()> {
        if resolve_input(config).is_some() {
            return Ok(());
        }
        let placeholder = PlaceholderEntry::create(&config.root_dir()).await?;
        info!(
            "no renderer entry found, using placeholder {}",
            placeholder.path().display()
        );
        self.state.lock().placeholder = Some(placeholder);
        Ok(())
    }

    async fn close_bundle(&self) -> Result<()> {
        let (user_config, env) = {
            let mut state = self.state.lock();
            if let Some(mut placeholder) = state.placeholder.take() {
                if let Err(e) = placeholder.remove() {
                    warn!("{}", e);
                }
            }
            (
                state.user_config.clone().unwrap_or_default(),
                state
                    .env
                    .clone()
                    .unwrap_or_else(|| ConfigEnv::new(Command::Build, "production")),
            )
        };

        let mut entries = self.entries.lock().await;
        for options in entries.iter_mut() {
            apply_build_defaults(options, &env, &user_config);
            info!(entry = %options.label(), "building electron entry");
            build_with(self.pipeline.as_ref(), options).await?;
        }
        Ok(())
    }
}

/// One plugin per host command.
#[derive(Debug)]
pub enum ElectronPlugin {
    Serve(DevPlugin),
    Build(BuildPlugin),
}

#[async_trait]
impl HostPlugin for ElectronPlugin {
    fn name(&self) -> &str {
        match self {
            ElectronPlugin::Serve(plugin) => plugin.name(),
            ElectronPlugin::Build(plugin) => plugin.name(),
        }
    }

    fn apply(&self) -> Option<Command> {
        match self {
            ElectronPlugin::Serve(plugin) => plugin.apply(),
            ElectronPlugin::Build(plugin) => plugin.apply(),
        }
    }

    fn config(&self, config: &mut InlineConfig, env: &ConfigEnv) {
        match self {
            ElectronPlugin::Serve(plugin) => plugin.config(config, env),
            ElectronPlugin::Build(plugin) => plugin.config(config, env),
        }
    }

    async fn config_resolved(&self, config: &InlineConfig) -> Result<()> {
        match self {
            ElectronPlugin::Serve(plugin) => plugin.config_resolved(config).await,
            ElectronPlugin::Build(plugin) => plugin.config_resolved(config).await,
        }
    }

    fn configure_server(&self, server: Arc<dyn DevServer>) {
        match self {
            ElectronPlugin::Serve(plugin) => plugin.configure_server(server),
            ElectronPlugin::Build(plugin) => plugin.configure_server(server),
        }
    }

    async fn close_bundle(&self) -> Result<()> {
        match self {
            ElectronPlugin::Serve(plugin) => plugin.close_bundle().await,
            ElectronPlugin::Build(plugin) => plugin.close_bundle().await,
        }
    }
}

/// Host plugins for `entries`, building with Rolldown and supervising the app
/// through [`Supervisor::global`].
pub fn electron(entries: impl IntoIterator<Item = ElectronOptions>) -> Vec<ElectronPlugin> {
    electron_with_pipeline(
        entries,
        Arc::new(RolldownPipeline::new()),
        Supervisor::global().clone(),
    )
}

/// [`electron`] with an explicit pipeline and supervisor.
pub fn electron_with_pipeline(
    entries: impl IntoIterator<Item = ElectronOptions>,
    pipeline: Arc<dyn BuildPipeline>,
    supervisor: Supervisor,
) -> Vec<ElectronPlugin> {
    let entries: Vec<ElectronOptions> = entries.into_iter().collect();
    vec![
        ElectronPlugin::Serve(DevPlugin::new(
            entries.clone(),
            Arc::clone(&pipeline),
            supervisor,
        )),
        ElectronPlugin::Build(BuildPlugin::new(entries, pipeline)),
    ]
}

/// Build one entry outside of any host: library defaults, builtins external.
pub async fn build(options: &ElectronOptions, pipeline: &dyn BuildPipeline) -> Result<()> {
    build_with(pipeline, options).await
}

async fn build_with(pipeline: &dyn BuildPipeline, options: &ElectronOptions) -> Result<()> {
    pipeline
        .build(with_external_builtins(resolve_electron_config(options)))
        .await
}
