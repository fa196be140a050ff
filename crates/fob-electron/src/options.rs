//! Option records for Electron entries and the build configuration they embed.
//!
//! [`ElectronOptions`] is one configured build target (main process, preload
//! scripts, ...). Its [`InlineConfig`] is deliberately close to a bundler's user
//! config: every field is optional so defaults inherited from the host can be
//! merged in place later.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;
use rolldown_plugin::__inner::SharedPluginable;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Result;
use crate::dispatch::OnStartContext;
use crate::host::{Command, SharedCloseBundle};

/// Entry points of a build, in the shapes bundlers usually accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryPoints {
    Single(String),
    Multiple(Vec<String>),
    Named(BTreeMap<String, String>),
}

impl EntryPoints {
    /// Flatten into `(name, import)` pairs, preserving declaration order.
    pub fn items(&self) -> Vec<(Option<String>, String)> {
        match self {
            EntryPoints::Single(import) => vec![(None, import.clone())],
            EntryPoints::Multiple(imports) => imports.iter().map(|i| (None, i.clone())).collect(),
            EntryPoints::Named(map) => map
                .iter()
                .map(|(name, import)| (Some(name.clone()), import.clone()))
                .collect(),
        }
    }

    /// Human readable label used in logs and errors.
    pub fn label(&self) -> String {
        self.items()
            .into_iter()
            .map(|(name, import)| name.unwrap_or(import))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<&str> for EntryPoints {
    fn from(value: &str) -> Self {
        EntryPoints::Single(value.to_string())
    }
}

impl From<String> for EntryPoints {
    fn from(value: String) -> Self {
        EntryPoints::Single(value)
    }
}

impl From<Vec<String>> for EntryPoints {
    fn from(value: Vec<String>) -> Self {
        EntryPoints::Multiple(value)
    }
}

/// Module format of the emitted chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Cjs,
    Es,
}

/// Library mode (`build.lib`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryOptions {
    pub entry: EntryPoints,

    #[serde(default)]
    pub formats: Vec<OutputFormat>,

    /// Output file name pattern, e.g. `[name].js`.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Fine-grained watch settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Directories to watch, relative to the root. Empty means the directories
    /// holding the entry files.
    #[serde(default)]
    pub include: Vec<PathBuf>,

    /// Extra ignore patterns (`node_modules` and the out dir are always ignored).
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub debounce_ms: Option<u64>,
}

/// `build.watch`: `true`/`false` or a table of [`WatchOptions`].
///
/// An explicit `false` is distinct from the key being absent: dev defaults only
/// fill in a watch config when the user wrote nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WatchConfig {
    Toggle(bool),
    Options(WatchOptions),
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig::Options(WatchOptions::default())
    }
}

impl WatchConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, WatchConfig::Toggle(false))
    }

    pub fn options(&self) -> WatchOptions {
        match self {
            WatchConfig::Options(options) => options.clone(),
            WatchConfig::Toggle(_) => WatchOptions::default(),
        }
    }
}

/// A module id the bundler must leave external.
#[derive(Clone)]
pub enum ExternalPattern {
    Exact(String),
    Regex(Regex),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl ExternalPattern {
    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        ExternalPattern::Predicate(Arc::new(f))
    }

    pub fn matches(&self, id: &str) -> bool {
        match self {
            ExternalPattern::Exact(exact) => exact == id,
            ExternalPattern::Regex(re) => re.is_match(id),
            ExternalPattern::Predicate(f) => f(id),
        }
    }
}

impl std::fmt::Debug for ExternalPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalPattern::Exact(s) => f.debug_tuple("Exact").field(s).finish(),
            ExternalPattern::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            ExternalPattern::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl PartialEq for ExternalPattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ExternalPattern::Exact(a), ExternalPattern::Exact(b)) => a == b,
            (ExternalPattern::Regex(a), ExternalPattern::Regex(b)) => a.as_str() == b.as_str(),
            (ExternalPattern::Predicate(a), ExternalPattern::Predicate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for ExternalPattern {
    fn from(value: &str) -> Self {
        ExternalPattern::Exact(value.to_string())
    }
}

impl From<String> for ExternalPattern {
    fn from(value: String) -> Self {
        ExternalPattern::Exact(value)
    }
}

impl From<Regex> for ExternalPattern {
    fn from(value: Regex) -> Self {
        ExternalPattern::Regex(value)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawExternal {
    Exact(String),
    Regex { regex: String },
}

impl Serialize for ExternalPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ExternalPattern::Exact(s) => RawExternal::Exact(s.clone()).serialize(serializer),
            ExternalPattern::Regex(re) => RawExternal::Regex {
                regex: re.as_str().to_string(),
            }
            .serialize(serializer),
            ExternalPattern::Predicate(_) => Err(serde::ser::Error::custom(
                "predicate externals cannot be serialized",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for ExternalPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawExternal::deserialize(deserializer)? {
            RawExternal::Exact(s) => Ok(ExternalPattern::Exact(s)),
            RawExternal::Regex { regex } => Regex::new(&regex)
                .map(ExternalPattern::Regex)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// `build.rolldown_options.output`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputOptions {
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub entry_file_names: Option<String>,
    #[serde(default)]
    pub chunk_file_names: Option<String>,
    #[serde(default)]
    pub asset_file_names: Option<String>,
    #[serde(default)]
    pub inline_dynamic_imports: Option<bool>,
}

/// Options handed straight to Rolldown (`build.rolldown_options`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolldownOptions {
    /// Takes precedence over `build.lib.entry`.
    #[serde(default)]
    pub input: Option<EntryPoints>,

    #[serde(default)]
    pub external: Vec<ExternalPattern>,

    #[serde(default)]
    pub output: OutputOptions,
}

/// `build` section of an [`InlineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub empty_out_dir: Option<bool>,
    #[serde(default)]
    pub minify: Option<bool>,
    #[serde(default)]
    pub sourcemap: Option<bool>,
    #[serde(default)]
    pub watch: Option<WatchConfig>,
    #[serde(default)]
    pub lib: Option<LibraryOptions>,
    #[serde(default)]
    pub rolldown_options: RolldownOptions,
}

/// `resolve` section of an [`InlineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConfig {
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub main_fields: Vec<String>,
}

/// A Rolldown plugin together with the command it is restricted to.
#[derive(Clone)]
pub struct ConfiguredPlugin {
    pub apply: Option<Command>,
    pub plugin: SharedPluginable,
}

impl ConfiguredPlugin {
    pub fn new(plugin: SharedPluginable) -> Self {
        Self {
            apply: None,
            plugin,
        }
    }

    /// Only active in watch (dev) builds.
    pub fn serve_only(mut self) -> Self {
        self.apply = Some(Command::Serve);
        self
    }

    pub fn applies_to(&self, command: Command) -> bool {
        self.apply.is_none_or(|apply| apply == command)
    }
}

impl std::fmt::Debug for ConfiguredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredPlugin")
            .field("apply", &self.apply)
            .finish_non_exhaustive()
    }
}

/// Full build configuration for one entry (or the host's own config).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InlineConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Public base path of the emitted assets.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub env_dir: Option<PathBuf>,
    #[serde(default)]
    pub env_prefix: Option<Vec<String>>,
    #[serde(default)]
    pub define: BTreeMap<String, String>,
    #[serde(default)]
    pub resolve: ResolveConfig,
    #[serde(default)]
    pub build: BuildConfig,

    #[serde(skip)]
    pub plugins: Vec<ConfiguredPlugin>,

    /// Stages run after every completed bundling pass.
    #[serde(skip)]
    pub close_bundle: Vec<SharedCloseBundle>,
}

impl InlineConfig {
    /// Project root, falling back to the current directory.
    pub fn root_dir(&self) -> PathBuf {
        match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Entry points the build starts from: `rolldown_options.input` wins over
    /// `lib.entry`.
    pub fn input(&self) -> Option<&EntryPoints> {
        self.build
            .rolldown_options
            .input
            .as_ref()
            .or(self.build.lib.as_ref().map(|lib| &lib.entry))
    }

    /// Which plugin set this configuration builds with: watch builds are dev
    /// builds.
    pub fn command(&self) -> Command {
        match &self.build.watch {
            Some(watch) if watch.is_enabled() => Command::Serve,
            _ => Command::Build,
        }
    }

    /// Out dir made absolute against the root.
    pub fn out_dir(&self, default: &Path) -> PathBuf {
        let out_dir = self.build.out_dir.as_deref().unwrap_or(default);
        if out_dir.is_absolute() {
            out_dir.to_path_buf()
        } else {
            self.root_dir().join(out_dir)
        }
    }
}

/// Callback run when all entries of a dev round finished bundling.
pub type OnStart = Arc<dyn Fn(OnStartContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One configured Electron build target.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ElectronOptions {
    /// Shortcut of `build.lib.entry`.
    #[serde(default)]
    pub entry: Option<EntryPoints>,

    #[serde(default)]
    pub config: InlineConfig,

    /// Runs after every dev round instead of starting the app. Start it through
    /// [`OnStartContext::startup`] when needed.
    #[serde(skip)]
    pub on_start: Option<OnStart>,
}

impl ElectronOptions {
    pub fn new(entry: impl Into<EntryPoints>) -> Self {
        Self {
            entry: Some(entry.into()),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, config: InlineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_on_start<F, Fut>(mut self, on_start: F) -> Self
    where
        F: Fn(OnStartContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_start = Some(Arc::new(move |ctx| Box::pin(on_start(ctx))));
        self
    }

    /// Label for logs: the entry, or the configured input.
    pub fn label(&self) -> String {
        self.entry
            .as_ref()
            .or(self.config.input())
            .map(EntryPoints::label)
            .unwrap_or_else(|| "<no entry>".to_string())
    }
}

impl std::fmt::Debug for ElectronOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectronOptions")
            .field("entry", &self.entry)
            .field("config", &self.config)
            .field("on_start", &self.on_start.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_items_keep_order() {
        let entry = EntryPoints::Multiple(vec!["b.ts".into(), "a.ts".into()]);
        let items: Vec<_> = entry.items().into_iter().map(|(_, i)| i).collect();
        assert_eq!(items, vec!["b.ts", "a.ts"]);
    }

    #[test]
    fn test_watch_toggle_false_is_disabled() {
        let watch: WatchConfig = serde_json::from_str("false").unwrap();
        assert!(!watch.is_enabled());

        let watch: WatchConfig = serde_json::from_str(r#"{"debounce_ms": 50}"#).unwrap();
        assert!(watch.is_enabled());
        assert_eq!(watch.options().debounce_ms, Some(50));
    }

    #[test]
    fn test_external_pattern_deserialize() {
        let patterns: Vec<ExternalPattern> =
            serde_json::from_str(r#"["electron", {"regex": "^@scope/"}]"#).unwrap();
        assert!(patterns[0].matches("electron"));
        assert!(!patterns[0].matches("electron-store"));
        assert!(patterns[1].matches("@scope/pkg"));
    }

    #[test]
    fn test_input_prefers_rolldown_input() {
        let mut config = InlineConfig::default();
        config.build.lib = Some(LibraryOptions {
            entry: "main.ts".into(),
            formats: vec![],
            file_name: None,
        });
        assert_eq!(config.input(), Some(&EntryPoints::from("main.ts")));

        config.build.rolldown_options.input = Some("preload.ts".into());
        assert_eq!(config.input(), Some(&EntryPoints::from("preload.ts")));
    }

    #[test]
    fn test_command_follows_watch() {
        let mut config = InlineConfig::default();
        assert_eq!(config.command(), Command::Build);
        config.build.watch = Some(WatchConfig::default());
        assert_eq!(config.command(), Command::Serve);
        config.build.watch = Some(WatchConfig::Toggle(false));
        assert_eq!(config.command(), Command::Build);
    }
}
