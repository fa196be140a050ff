//! Config resolution: fill entry configs with defaults from the host.
//!
//! All `apply_*` functions mutate the options they are given. Callers that
//! need the original values must clone before calling.

use std::path::Path;

use tracing::debug;

use crate::host::ConfigEnv;
use crate::options::{
    ElectronOptions, ExternalPattern, InlineConfig, LibraryOptions, OutputFormat, WatchConfig,
};

/// Default output directory for main/preload builds.
pub const DEFAULT_OUT_DIR: &str = "dist-electron";

/// Relative base so the packaged app can load its output through `file://`.
pub const DEFAULT_BASE: &str = "./";

/// Node builtin modules (without the internal `_` prefixed ones).
pub const NODE_BUILTINS: &[&str] = &[
    "assert",
    "assert/strict",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "dns/promises",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "inspector/promises",
    "module",
    "net",
    "os",
    "path",
    "path/posix",
    "path/win32",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "readline/promises",
    "repl",
    "stream",
    "stream/consumers",
    "stream/promises",
    "stream/web",
    "string_decoder",
    "sys",
    "timers",
    "timers/promises",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "util/types",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Fill dev defaults from the dev server's resolved config.
///
/// `build.watch` is only filled in when the user left it out entirely, so an
/// explicit `watch = false` survives. `build.minify` defaults to off.
pub fn apply_serve_defaults(options: &mut ElectronOptions, server_config: &InlineConfig) {
    let config = &mut options.config;
    inherit_env(config, server_config.mode.as_deref(), server_config);

    if config.build.watch.is_none() {
        config.build.watch = Some(WatchConfig::default());
    }
    config.build.minify.get_or_insert(false);
}

/// Fill build defaults: mode from the config env, the rest from the user config
/// the host was started with.
pub fn apply_build_defaults(options: &mut ElectronOptions, env: &ConfigEnv, user: &InlineConfig) {
    inherit_env(&mut options.config, Some(env.mode.as_str()), user);
}

/// Default the public base path to [`DEFAULT_BASE`].
pub fn apply_base_default(config: &mut InlineConfig) {
    config.base.get_or_insert_with(|| DEFAULT_BASE.to_string());
}

fn inherit_env(config: &mut InlineConfig, mode: Option<&str>, from: &InlineConfig) {
    if config.mode.is_none() {
        config.mode = mode.map(str::to_string);
    }
    if config.root.is_none() {
        config.root = from.root.clone();
    }
    if config.env_dir.is_none() {
        config.env_dir = from.env_dir.clone();
    }
    if config.env_prefix.is_none() {
        config.env_prefix = from.env_prefix.clone();
    }
}

/// Build the final configuration of one entry: library defaults with the
/// user's config merged over them.
pub fn resolve_electron_config(options: &ElectronOptions) -> InlineConfig {
    let root = options.config.root_dir();
    let format = if is_esm_package(&root) {
        OutputFormat::Es
    } else {
        OutputFormat::Cjs
    };

    let mut defaults = InlineConfig::default();
    defaults.build.lib = options.entry.clone().map(|entry| LibraryOptions {
        entry,
        formats: vec![format],
        file_name: Some("[name].js".to_string()),
    });
    defaults.build.out_dir = Some(DEFAULT_OUT_DIR.into());
    defaults.build.empty_out_dir = Some(false);
    defaults.resolve.conditions = vec!["node".to_string()];
    defaults.resolve.main_fields = vec![
        "module".to_string(),
        "jsnext:main".to_string(),
        "jsnext".to_string(),
    ];
    defaults
        .define
        .insert("process.env".to_string(), "process.env".to_string());

    debug!(entry = %options.label(), ?format, "resolved electron build defaults");
    merge_config(defaults, options.config.clone())
}

/// Merge `overrides` over `defaults`: scalars from `overrides` win, lists are
/// concatenated (defaults first), maps are merged key by key.
pub fn merge_config(defaults: InlineConfig, overrides: InlineConfig) -> InlineConfig {
    let mut define = defaults.define;
    define.extend(overrides.define);

    let mut plugins = defaults.plugins;
    plugins.extend(overrides.plugins);

    let mut close_bundle = defaults.close_bundle;
    close_bundle.extend(overrides.close_bundle);

    let (d, o) = (defaults.build, overrides.build);
    let (d_rd, o_rd) = (d.rolldown_options, o.rolldown_options);

    let mut external = d_rd.external;
    external.extend(o_rd.external);

    InlineConfig {
        root: overrides.root.or(defaults.root),
        mode: overrides.mode.or(defaults.mode),
        base: overrides.base.or(defaults.base),
        env_dir: overrides.env_dir.or(defaults.env_dir),
        env_prefix: overrides.env_prefix.or(defaults.env_prefix),
        define,
        resolve: crate::options::ResolveConfig {
            conditions: concat(defaults.resolve.conditions, overrides.resolve.conditions),
            main_fields: concat(defaults.resolve.main_fields, overrides.resolve.main_fields),
        },
        build: crate::options::BuildConfig {
            out_dir: o.out_dir.or(d.out_dir),
            empty_out_dir: o.empty_out_dir.or(d.empty_out_dir),
            minify: o.minify.or(d.minify),
            sourcemap: o.sourcemap.or(d.sourcemap),
            watch: o.watch.or(d.watch),
            lib: o.lib.or(d.lib),
            rolldown_options: crate::options::RolldownOptions {
                input: o_rd.input.or(d_rd.input),
                external,
                output: crate::options::OutputOptions {
                    format: o_rd.output.format.or(d_rd.output.format),
                    entry_file_names: o_rd.output.entry_file_names.or(d_rd.output.entry_file_names),
                    chunk_file_names: o_rd.output.chunk_file_names.or(d_rd.output.chunk_file_names),
                    asset_file_names: o_rd.output.asset_file_names.or(d_rd.output.asset_file_names),
                    inline_dynamic_imports: o_rd
                        .output
                        .inline_dynamic_imports
                        .or(d_rd.output.inline_dynamic_imports),
                },
            },
        },
        plugins,
        close_bundle,
    }
}

fn concat(mut first: Vec<String>, second: Vec<String>) -> Vec<String> {
    first.extend(second);
    first
}

/// Mark every Node builtin (bare and `node:` prefixed) and `electron` as
/// external, ahead of the user's own external patterns.
pub fn with_external_builtins(mut config: InlineConfig) -> InlineConfig {
    let mut external: Vec<ExternalPattern> = NODE_BUILTINS
        .iter()
        .map(|m| ExternalPattern::from(*m))
        .collect();
    external.push(ExternalPattern::from("electron"));
    external.extend(
        NODE_BUILTINS
            .iter()
            .map(|m| ExternalPattern::Exact(format!("node:{}", m))),
    );

    external.append(&mut config.build.rolldown_options.external);
    config.build.rolldown_options.external = external;
    config
}

/// Whether the `package.json` at `root` declares `"type": "module"`.
pub(crate) fn is_esm_package(root: &Path) -> bool {
    let Ok(source) = std::fs::read_to_string(root.join("package.json")) else {
        return false;
    };
    match serde_json::from_str::<serde_json::Value>(&source) {
        Ok(json) => json.get("type").and_then(|t| t.as_str()) == Some("module"),
        Err(e) => {
            debug!("ignoring unreadable package.json in {}: {}", root.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Command;
    use crate::options::WatchOptions;

    #[test]
    fn test_base_defaults_to_relative() {
        let mut config = InlineConfig::default();
        apply_base_default(&mut config);
        assert_eq!(config.base.as_deref(), Some("./"));

        let mut config = InlineConfig {
            base: Some("/app/".to_string()),
            ..Default::default()
        };
        apply_base_default(&mut config);
        assert_eq!(config.base.as_deref(), Some("/app/"));
    }

    #[test]
    fn test_serve_defaults_force_watch_and_no_minify() {
        let server = InlineConfig {
            root: Some("/project".into()),
            mode: Some("development".to_string()),
            env_prefix: Some(vec!["FOB_".to_string()]),
            ..Default::default()
        };
        let mut options = ElectronOptions::new("electron/main.ts");
        apply_serve_defaults(&mut options, &server);

        assert_eq!(options.config.mode.as_deref(), Some("development"));
        assert_eq!(options.config.root.as_deref(), Some(Path::new("/project")));
        assert_eq!(options.config.env_prefix, Some(vec!["FOB_".to_string()]));
        assert_eq!(options.config.build.minify, Some(false));
        assert_eq!(options.config.build.watch, Some(WatchConfig::default()));
    }

    #[test]
    fn test_serve_defaults_keep_explicit_watch() {
        let custom = WatchConfig::Options(WatchOptions {
            debounce_ms: Some(10),
            ..Default::default()
        });

        let mut options = ElectronOptions::new("main.ts");
        options.config.build.watch = Some(custom.clone());
        apply_serve_defaults(&mut options, &InlineConfig::default());
        assert_eq!(options.config.build.watch, Some(custom));

        let mut options = ElectronOptions::new("main.ts");
        options.config.build.watch = Some(WatchConfig::Toggle(false));
        apply_serve_defaults(&mut options, &InlineConfig::default());
        assert_eq!(options.config.build.watch, Some(WatchConfig::Toggle(false)));
        assert_eq!(options.config.command(), Command::Build);
    }

    #[test]
    fn test_serve_defaults_keep_user_values() {
        let mut options = ElectronOptions::new("main.ts");
        options.config.mode = Some("staging".to_string());
        options.config.build.minify = Some(true);

        let server = InlineConfig {
            mode: Some("development".to_string()),
            ..Default::default()
        };
        apply_serve_defaults(&mut options, &server);

        assert_eq!(options.config.mode.as_deref(), Some("staging"));
        assert_eq!(options.config.build.minify, Some(true));
    }

    #[test]
    fn test_build_defaults_take_mode_from_env() {
        let user = InlineConfig {
            root: Some("/project".into()),
            mode: Some("ignored".to_string()),
            ..Default::default()
        };
        let mut options = ElectronOptions::new("main.ts");
        apply_build_defaults(&mut options, &ConfigEnv::new(Command::Build, "production"), &user);

        assert_eq!(options.config.mode.as_deref(), Some("production"));
        assert_eq!(options.config.root.as_deref(), Some(Path::new("/project")));
        assert!(options.config.build.watch.is_none());
    }

    #[test]
    fn test_resolve_electron_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ElectronOptions::new("electron/main.ts");
        options.config.root = Some(dir.path().to_path_buf());
        options.config.resolve.conditions = vec!["electron".to_string()];

        let config = resolve_electron_config(&options);
        let lib = config.build.lib.as_ref().unwrap();
        assert_eq!(lib.formats, vec![OutputFormat::Cjs]);
        assert_eq!(lib.file_name.as_deref(), Some("[name].js"));
        assert_eq!(config.build.out_dir.as_deref(), Some(Path::new(DEFAULT_OUT_DIR)));
        assert_eq!(config.build.empty_out_dir, Some(false));
        assert_eq!(config.resolve.conditions, vec!["node", "electron"]);
        assert_eq!(
            config.define.get("process.env").map(String::as_str),
            Some("process.env")
        );
    }

    #[test]
    fn test_resolve_electron_config_esm_package() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"type": "module"}"#).unwrap();

        let mut options = ElectronOptions::new("main.ts");
        options.config.root = Some(dir.path().to_path_buf());

        let config = resolve_electron_config(&options);
        assert_eq!(config.build.lib.unwrap().formats, vec![OutputFormat::Es]);
    }

    #[test]
    fn test_user_out_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ElectronOptions::new("main.ts");
        options.config.root = Some(dir.path().to_path_buf());
        options.config.build.out_dir = Some("out/main".into());

        let config = resolve_electron_config(&options);
        assert_eq!(config.build.out_dir.as_deref(), Some(Path::new("out/main")));
    }

    #[test]
    fn test_with_external_builtins_keeps_user_patterns_last() {
        let mut config = InlineConfig::default();
        config.build.rolldown_options.external = vec!["electron-store".into()];

        let config = with_external_builtins(config);
        let external = &config.build.rolldown_options.external;

        assert_eq!(external.len(), NODE_BUILTINS.len() * 2 + 2);
        assert_eq!(external[0], ExternalPattern::from("assert"));
        assert_eq!(external[NODE_BUILTINS.len()], ExternalPattern::from("electron"));
        assert_eq!(
            external[NODE_BUILTINS.len() + 1],
            ExternalPattern::from("node:assert")
        );
        assert_eq!(external.last(), Some(&ExternalPattern::from("electron-store")));
    }

    #[test]
    fn test_with_external_builtins_keeps_predicates() {
        let mut config = InlineConfig::default();
        config.build.rolldown_options.external =
            vec![ExternalPattern::predicate(|id| id.starts_with("electron"))];

        let config = with_external_builtins(config);
        let last = config.build.rolldown_options.external.last().unwrap();
        assert!(last.matches("electron-updater"));
        assert!(!last.matches("lodash"));
    }
}
