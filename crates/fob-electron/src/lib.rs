#![cfg_attr(docsrs, feature(doc_cfg))]

//! # fob-electron
//!
//! Electron main/preload builds and dev-time app supervision for fob.
//!
//! The crate plugs into a host bundler's lifecycle through [`HostPlugin`]:
//!
//! - in dev, every entry is built in watch mode once the dev server listens,
//!   and the Electron app is (re)started when all entries finished a pass;
//! - in a production build, entries are built one after another after the
//!   host's own bundle.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fob_electron::{ElectronOptions, HostPlugin, electron};
//!
//! let plugins = electron([
//!     ElectronOptions::new("electron/main.ts"),
//!     ElectronOptions::new("electron/preload.ts")
//!         .with_on_start(|ctx| async move { ctx.reload().await }),
//! ]);
//! for plugin in &plugins {
//!     println!("{} applies to {:?}", plugin.name(), plugin.apply());
//! }
//! ```
//!
//! ### Building one entry
//!
//! ```no_run
//! use fob_electron::{ElectronOptions, RolldownPipeline, build};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> fob_electron::Result<()> {
//! build(&ElectronOptions::new("electron/main.ts"), &RolldownPipeline::new()).await?;
//! # Ok(()) }
//! ```

pub mod config;
pub mod dispatch;
pub mod host;
pub mod loading;
pub mod not_bundle;
pub mod options;
pub mod pipeline;
pub mod placeholder;
pub mod simple;
pub mod supervisor;

mod error;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

pub use config::{
    DEFAULT_BASE, DEFAULT_OUT_DIR, NODE_BUILTINS, apply_base_default, apply_build_defaults,
    apply_serve_defaults, merge_config, resolve_electron_config, with_external_builtins,
};
pub use dispatch::{
    BuildPlugin, CompletionCounter, DevPlugin, ElectronPlugin, OnStartContext, build, electron,
    electron_with_pipeline,
};
pub use error::{Error, Result};
pub use host::{
    CloseBundleHook, Command, ConfigEnv, DevServer, HostPlugin, HotChannel, HotPayload,
    ListeningCallback, NoopHotChannel, SharedCloseBundle,
};
pub use loading::{ElectronConfigFile, load_options};
pub use not_bundle::{
    ExternalFilter, HostResolve, NotBundleOptions, NotBundlePlugin, is_bare_import, not_bundle,
};
pub use options::{
    BuildConfig, ConfiguredPlugin, ElectronOptions, EntryPoints, ExternalPattern, InlineConfig,
    LibraryOptions, OnStart, OutputFormat, OutputOptions, ResolveConfig, RolldownOptions,
    WatchConfig, WatchOptions,
};
pub use pipeline::{BuildPipeline, RolldownPipeline};
pub use simple::{PreloadOptions, RendererIntegration, SimpleOptions, electron_simple};
pub use supervisor::{
    DEFAULT_ARGV, DEV_SERVER_URL_ENV, HOT_RELOAD_MESSAGE, ProcessState, StartupOptions,
    Supervisor, startup,
};

// Re-export the plugin types needed to write Rolldown plugins for `InlineConfig::plugins`
pub use rolldown_plugin::{__inner::SharedPluginable, Plugin};
