//! Build pipeline seam and the default Rolldown-backed implementation.
//!
//! The dispatcher hands every resolved entry configuration to a
//! [`BuildPipeline`]. [`RolldownPipeline`] bundles it with Rolldown, writes the
//! output to `build.out_dir`, runs the configuration's close hooks, and keeps
//! rebuilding on source changes when `build.watch` is enabled.

mod externals;
mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use path_clean::PathClean;
use rolldown::{
    BundlerBuilder, BundlerOptions, InputItem, Platform, RawMinifyOptions, ResolveOptions,
    SourceMapType,
};
use rolldown_plugin::__inner::SharedPluginable;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DEFAULT_OUT_DIR;
use crate::options::{InlineConfig, OutputFormat, WatchOptions};
use crate::{Error, Result};

pub use externals::ExternalsPlugin;
pub use watcher::{FileChange, FileWatcher};

const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Runs one entry build to completion.
///
/// Implementations must run `config.close_bundle` hooks, in order, after every
/// completed bundling pass. With `build.watch` enabled the initial pass is
/// awaited and later passes continue in the background.
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    async fn build(&self, config: InlineConfig) -> Result<()>;
}

/// [`BuildPipeline`] backed by Rolldown.
#[derive(Debug, Default)]
pub struct RolldownPipeline {
    watches: Mutex<Vec<JoinHandle<()>>>,
}

impl RolldownPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently being watched.
    pub fn active_watches(&self) -> usize {
        let mut watches = self.watches.lock();
        watches.retain(|handle| !handle.is_finished());
        watches.len()
    }

    /// Stop every watch loop.
    pub fn close(&self) {
        for handle in self.watches.lock().drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl BuildPipeline for RolldownPipeline {
    async fn build(&self, config: InlineConfig) -> Result<()> {
        let job = Arc::new(BuildJob::new(config)?);
        job.run_pass(true).await?;

        let Some(watch) = job.watch_options() else {
            return Ok(());
        };

        let debounce = watch.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS);
        let roots = job.watch_roots(&watch);
        let mut ignore = vec![
            "node_modules".to_string(),
            job.out_dir.to_string_lossy().into_owned(),
        ];
        ignore.extend(watch.exclude.iter().cloned());

        let (file_watcher, changes) = FileWatcher::new(roots, ignore, debounce)?;
        info!(entry = %job.label, roots = ?file_watcher.roots(), "watching for changes");

        let handle = tokio::spawn(Arc::clone(&job).watch_loop(
            file_watcher,
            changes,
            Duration::from_millis(debounce),
        ));
        self.watches.lock().push(handle);
        Ok(())
    }
}

/// One entry configuration, prepared for repeated passes.
struct BuildJob {
    label: String,
    root: PathBuf,
    out_dir: PathBuf,
    config: InlineConfig,
}

impl BuildJob {
    fn new(config: InlineConfig) -> Result<Self> {
        let input = config.input().ok_or_else(|| {
            Error::InvalidConfig(
                "No entry configured: set `entry`, `build.lib.entry` or `build.rolldown_options.input`"
                    .to_string(),
            )
        })?;
        let label = input.label();
        let root = config.root_dir().clean();
        let out_dir = config.out_dir(Path::new(DEFAULT_OUT_DIR)).clean();

        if config.build.empty_out_dir == Some(true) && root.starts_with(&out_dir) {
            return Err(Error::InvalidConfig(format!(
                "Refusing to empty {}: it contains the project root",
                out_dir.display()
            )));
        }

        Ok(Self {
            label,
            root,
            out_dir,
            config,
        })
    }

    fn watch_options(&self) -> Option<WatchOptions> {
        self.config
            .build
            .watch
            .as_ref()
            .filter(|watch| watch.is_enabled())
            .map(|watch| watch.options())
    }

    /// Explicit `include` dirs, else the directories holding the entry files,
    /// else the root.
    fn watch_roots(&self, watch: &WatchOptions) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = if watch.include.is_empty() {
            self.config
                .input()
                .map(|input| {
                    input
                        .items()
                        .into_iter()
                        .filter_map(|(_, import)| {
                            self.root.join(import).clean().parent().map(Path::to_path_buf)
                        })
                        .collect()
                })
                .unwrap_or_default()
        } else {
            watch
                .include
                .iter()
                .map(|dir| self.root.join(dir).clean())
                .collect()
        };

        roots.sort();
        roots.dedup();
        // Nested roots are covered by their ancestors.
        let mut deduped: Vec<PathBuf> = Vec::with_capacity(roots.len());
        for root in roots {
            if !deduped.iter().any(|kept| root.starts_with(kept)) {
                deduped.push(root);
            }
        }
        if deduped.is_empty() {
            deduped.push(self.root.clone());
        }
        deduped
    }

    fn plugins(&self) -> Vec<SharedPluginable> {
        let command = self.config.command();
        let mut plugins: Vec<SharedPluginable> = Vec::new();

        let external = &self.config.build.rolldown_options.external;
        if !external.is_empty() {
            plugins.push(Arc::new(ExternalsPlugin::new(external.clone())));
        }

        plugins.extend(
            self.config
                .plugins
                .iter()
                .filter(|configured| configured.applies_to(command))
                .map(|configured| Arc::clone(&configured.plugin)),
        );
        plugins
    }

    fn bundler_options(&self) -> Result<BundlerOptions> {
        let config = &self.config;
        let input = config.input().ok_or_else(|| {
            Error::InvalidConfig(format!("Entry {} lost its input", self.label))
        })?;
        let output = &config.build.rolldown_options.output;
        let lib = config.build.lib.as_ref();

        let format = output
            .format
            .or_else(|| lib.and_then(|lib| lib.formats.first().copied()))
            .unwrap_or_default();
        let entry_file_names = output
            .entry_file_names
            .clone()
            .or_else(|| lib.and_then(|lib| lib.file_name.clone()));

        let mut main_fields = config.resolve.main_fields.clone();
        if !main_fields.is_empty() && !main_fields.iter().any(|field| field == "main") {
            main_fields.push("main".to_string());
        }

        let define: Vec<(String, String)> = config
            .define
            .iter()
            .filter(|(key, value)| key != value)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(BundlerOptions {
            input: Some(
                input
                    .items()
                    .into_iter()
                    .map(|(name, import)| InputItem {
                        name,
                        import: normalize_import(&import),
                    })
                    .collect(),
            ),
            cwd: Some(self.root.clone()),
            format: Some(match format {
                OutputFormat::Cjs => rolldown::OutputFormat::Cjs,
                OutputFormat::Es => rolldown::OutputFormat::Esm,
            }),
            platform: Some(Platform::Node),
            minify: Some(RawMinifyOptions::from(config.build.minify.unwrap_or(false))),
            sourcemap: config
                .build
                .sourcemap
                .unwrap_or(false)
                .then_some(SourceMapType::File),
            define: (!define.is_empty()).then(|| define.into_iter().collect()),
            resolve: Some(ResolveOptions {
                condition_names: non_empty(config.resolve.conditions.clone()),
                main_fields: non_empty(main_fields),
                ..Default::default()
            }),
            entry_filenames: entry_file_names.map(Into::into),
            chunk_filenames: output.chunk_file_names.clone().map(Into::into),
            asset_filenames: output.asset_file_names.clone().map(Into::into),
            inline_dynamic_imports: output.inline_dynamic_imports,
            ..Default::default()
        })
    }

    /// Bundle, write, then run the close hooks.
    async fn run_pass(&self, first: bool) -> Result<()> {
        let started = Instant::now();
        debug!(entry = %self.label, first, "starting bundling pass");

        let mut bundler = BundlerBuilder::default()
            .with_options(self.bundler_options()?)
            .with_plugins(self.plugins())
            .build()
            .map_err(|e| Error::build(&self.label, &e))?;

        let bundle = bundler
            .generate()
            .await
            .map_err(|e| Error::build(&self.label, &e))?;

        if first && self.config.build.empty_out_dir == Some(true) {
            empty_dir(&self.out_dir).await?;
        }

        tokio::fs::create_dir_all(&self.out_dir).await.map_err(|e| {
            Error::io_at(format!("Failed to create {}", self.out_dir.display()), e)
        })?;
        for asset in bundle.assets.iter() {
            let path = self.out_dir.join(asset.filename());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::io_at(format!("Failed to create {}", parent.display()), e)
                })?;
            }
            tokio::fs::write(&path, asset.content_as_bytes())
                .await
                .map_err(|e| Error::io_at(format!("Failed to write {}", path.display()), e))?;
        }

        info!(
            entry = %self.label,
            files = bundle.assets.len(),
            "built in {}ms",
            started.elapsed().as_millis()
        );

        for hook in &self.config.close_bundle {
            debug!(entry = %self.label, hook = hook.name(), "running close hook");
            hook.close_bundle().await?;
        }
        Ok(())
    }

    async fn watch_loop(
        self: Arc<Self>,
        file_watcher: FileWatcher,
        mut changes: mpsc::Receiver<FileChange>,
        debounce: Duration,
    ) {
        let _file_watcher = file_watcher;

        while let Some(change) = changes.recv().await {
            // Editors save in bursts; rebuild once per burst.
            tokio::time::sleep(debounce).await;
            let mut batched = 1;
            while changes.try_recv().is_ok() {
                batched += 1;
            }

            info!(
                entry = %self.label,
                path = %change.path().display(),
                batched,
                "change detected, rebuilding"
            );
            if let Err(e) = self.run_pass(false).await {
                error!(entry = %self.label, "rebuild failed: {}", e);
            }
        }

        debug!(entry = %self.label, "watch loop stopped");
    }
}

/// Entries are paths relative to the root; Rolldown would look bare ones
/// (`electron/main.ts`) up in node_modules.
fn normalize_import(import: &str) -> String {
    let cleaned = Path::new(import).to_path_buf().clean();
    if cleaned.is_absolute() || cleaned.starts_with("..") {
        cleaned.to_string_lossy().into_owned()
    } else {
        format!("./{}", cleaned.to_string_lossy())
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

async fn empty_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("emptied {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io_at(format!("Failed to empty {}", dir.display()), e)),
    }
    Ok(())
}
