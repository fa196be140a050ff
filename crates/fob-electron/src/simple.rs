//! Flat main/preload/renderer API.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{is_esm_package, merge_config};
use crate::dispatch::{OnStartContext, electron_with_pipeline};
use crate::host::HostPlugin;
use crate::options::{ElectronOptions, EntryPoints, InlineConfig, OutputFormat};
use crate::pipeline::{BuildPipeline, RolldownPipeline};
use crate::supervisor::Supervisor;
use crate::{Error, Result};

/// Preload scripts. `input` goes to `build.rolldown_options.input` rather
/// than `build.lib`, since preload scripts may pull in web assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadOptions {
    pub input: EntryPoints,

    /// Everything but the entry; `options.entry` is ignored.
    #[serde(flatten)]
    pub options: ElectronOptions,
}

impl PreloadOptions {
    pub fn new(input: impl Into<EntryPoints>) -> Self {
        Self {
            input: input.into(),
            options: ElectronOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleOptions {
    pub main: ElectronOptions,

    #[serde(default)]
    pub preload: Option<PreloadOptions>,

    /// Options passed through to the renderer integration.
    #[serde(default)]
    pub renderer: Option<serde_json::Value>,
}

impl SimpleOptions {
    pub fn new(main: ElectronOptions) -> Self {
        Self {
            main,
            preload: None,
            renderer: None,
        }
    }

    pub fn with_preload(mut self, preload: PreloadOptions) -> Self {
        self.preload = Some(preload);
        self
    }

    pub fn with_renderer(mut self, renderer: serde_json::Value) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

/// Provider of the host plugin that lets renderer code use Node APIs.
pub trait RendererIntegration: Send + Sync {
    fn plugin(&self, options: &serde_json::Value) -> Result<Box<dyn HostPlugin>>;
}

/// Host plugins for a main entry, optional preload scripts and an optional
/// renderer integration.
pub fn electron_simple(
    options: SimpleOptions,
    renderer: Option<&dyn RendererIntegration>,
) -> Result<Vec<Box<dyn HostPlugin>>> {
    electron_simple_with(
        options,
        renderer,
        Arc::new(RolldownPipeline::new()),
        Supervisor::global().clone(),
    )
}

/// [`electron_simple`] with an explicit pipeline and supervisor.
pub fn electron_simple_with(
    options: SimpleOptions,
    renderer: Option<&dyn RendererIntegration>,
    pipeline: Arc<dyn BuildPipeline>,
    supervisor: Supervisor,
) -> Result<Vec<Box<dyn HostPlugin>>> {
    let SimpleOptions {
        main,
        preload,
        renderer: renderer_options,
    } = options;

    let esm = is_esm_package(&main.config.root_dir());
    let mut entries = vec![main];
    if let Some(preload) = preload {
        entries.push(preload_entry(preload, esm));
    }

    let mut plugins: Vec<Box<dyn HostPlugin>> = electron_with_pipeline(entries, pipeline, supervisor)
        .into_iter()
        .map(|plugin| Box::new(plugin) as Box<dyn HostPlugin>)
        .collect();

    if let Some(renderer_options) = renderer_options {
        let integration = renderer.ok_or(Error::RendererNotInstalled)?;
        let plugin = integration
            .plugin(&renderer_options)
            .map_err(|e| match e {
                Error::Renderer(_) | Error::RendererNotInstalled => e,
                other => Error::Renderer(other.to_string()),
            })?;
        debug!(plugin = plugin.name(), "added renderer integration");
        plugins.push(plugin);
    }

    Ok(plugins)
}

/// Preload entry: reload instead of restart, single CommonJS chunk.
pub fn preload_entry(preload: PreloadOptions, esm: bool) -> ElectronOptions {
    let PreloadOptions { input, options } = preload;
    let ext = if esm { "mjs" } else { "js" };

    let mut defaults = InlineConfig::default();
    let rolldown = &mut defaults.build.rolldown_options;
    rolldown.input = Some(input);
    rolldown.output.format = Some(OutputFormat::Cjs);
    // Sandboxed preload scripts cannot require() sibling chunks.
    rolldown.output.inline_dynamic_imports = Some(true);
    rolldown.output.entry_file_names = Some(format!("[name].{}", ext));
    rolldown.output.chunk_file_names = Some(format!("[name].{}", ext));
    rolldown.output.asset_file_names = Some("[name].[ext]".to_string());

    let mut entry = ElectronOptions {
        entry: None,
        config: merge_config(defaults, options.config),
        on_start: options.on_start,
    };
    if entry.on_start.is_none() {
        entry = entry.with_on_start(|ctx: OnStartContext| async move { ctx.reload().await });
    }
    entry
}
