//! Dev-time externalization of CommonJS dependencies.
//!
//! The main process is built to CommonJS, so in dev there is no need to bundle
//! npm packages that `require()` can load at runtime. Leaving them external
//! keeps rebuilds fast. Only bare imports from project code are considered; the
//! decision for a specifier is cached for the rest of the session.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rolldown_common::ResolvedExternal;
use rolldown_plugin::{
    HookResolveIdArgs, HookResolveIdOutput, HookResolveIdReturn, HookUsage, Plugin, PluginContext,
    PluginContextResolveOptions,
};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::options::ConfiguredPlugin;

/// Extra check on the resolved path of a dependency. Returning `false` keeps
/// the dependency bundled.
pub type NotBundleFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct NotBundleOptions {
    pub filter: Option<NotBundleFilter>,
}

impl NotBundleOptions {
    pub fn with_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl std::fmt::Debug for NotBundleOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotBundleOptions")
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Whether `id` is a bare module specifier (`lodash`, `@scope/pkg`), as opposed
/// to a path, a Windows drive path or a URL.
pub fn is_bare_import(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphanumeric() || first == '_' || first == '@') {
        return false;
    }
    if first.is_ascii_alphabetic() && chars.next() == Some(':') {
        return false;
    }
    !id[first.len_utf8()..].contains("://")
}

fn in_node_modules(path: &str) -> bool {
    path.contains("/node_modules/") || path.contains("\\node_modules\\")
}

/// Resolution through the host bundler, honoring its plugins and options.
#[async_trait]
pub trait HostResolve: Send + Sync {
    /// Resolved id of `specifier` imported from `importer`, `None` when the
    /// host cannot resolve it.
    async fn resolve(&self, specifier: &str, importer: &str) -> Option<String>;
}

/// Decides which bare imports stay external.
pub struct ExternalFilter {
    external_ids: Mutex<FxHashSet<String>>,
    filter: Option<NotBundleFilter>,
    require: oxc_resolver::Resolver,
}

impl std::fmt::Debug for ExternalFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalFilter")
            .field("external_ids", &self.external_ids.lock().len())
            .field("filter", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

impl ExternalFilter {
    pub fn new(options: NotBundleOptions) -> Self {
        let require = oxc_resolver::Resolver::new(oxc_resolver::ResolveOptions {
            condition_names: vec!["require".into(), "node".into(), "default".into()],
            extensions: vec![".js".into(), ".json".into(), ".node".into(), ".cjs".into()],
            ..Default::default()
        });

        Self {
            external_ids: Mutex::new(FxHashSet::default()),
            filter: options.filter,
            require,
        }
    }

    /// Whether `specifier` was already confirmed external.
    pub fn is_known_external(&self, specifier: &str) -> bool {
        self.external_ids.lock().contains(specifier)
    }

    /// Decide whether `specifier`, imported from `importer`, stays external.
    pub async fn is_external(
        &self,
        specifier: &str,
        importer: Option<&str>,
        host: &dyn HostResolve,
    ) -> bool {
        if !is_bare_import(specifier) {
            return false;
        }
        let Some(importer) = importer else {
            return false;
        };
        if in_node_modules(importer) {
            return false;
        }
        if self.is_known_external(specifier) {
            return true;
        }

        let Some(resolved) = host.resolve(specifier, importer).await else {
            return false;
        };
        if !in_node_modules(&resolved) {
            return false;
        }
        if let Some(filter) = &self.filter {
            if !filter(resolved.as_str()) {
                debug!(specifier, resolved, "kept bundled by filter");
                return false;
            }
        }

        if !self.can_require(specifier, importer) {
            return false;
        }

        self.external_ids.lock().insert(specifier.to_string());
        debug!(specifier, "externalized");
        true
    }

    /// Node's `require.resolve` from the importer's directory.
    fn can_require(&self, specifier: &str, importer: &str) -> bool {
        let dir = Path::new(importer).parent().unwrap_or_else(|| Path::new("."));
        match self.require.resolve(dir, specifier) {
            Ok(_) => true,
            Err(e) => {
                debug!(specifier, importer, "not requirable: {}", e);
                false
            }
        }
    }
}

/// Rolldown plugin around an [`ExternalFilter`].
#[derive(Debug, Clone)]
pub struct NotBundlePlugin {
    filter: Arc<ExternalFilter>,
}

impl NotBundlePlugin {
    pub fn new(options: NotBundleOptions) -> Self {
        Self {
            filter: Arc::new(ExternalFilter::new(options)),
        }
    }

    pub fn filter(&self) -> &ExternalFilter {
        &self.filter
    }
}

struct ContextResolve {
    ctx: PluginContext,
}

#[async_trait]
impl HostResolve for ContextResolve {
    async fn resolve(&self, specifier: &str, importer: &str) -> Option<String> {
        let options = PluginContextResolveOptions {
            skip_self: true,
            ..Default::default()
        };
        match self.ctx.resolve(specifier, Some(importer), Some(options)).await {
            Ok(Ok(resolved)) => Some(resolved.id.to_string()),
            Ok(Err(_)) => None,
            Err(e) => {
                debug!(specifier, importer, "host resolve failed: {}", e);
                None
            }
        }
    }
}

impl Plugin for NotBundlePlugin {
    fn name(&self) -> Cow<'static, str> {
        "fob-electron:not-bundle".into()
    }

    fn register_hook_usage(&self) -> HookUsage {
        HookUsage::ResolveId
    }

    fn resolve_id(
        &self,
        ctx: &PluginContext,
        args: &HookResolveIdArgs<'_>,
    ) -> impl std::future::Future<Output = HookResolveIdReturn> + Send {
        let specifier = args.specifier.to_string();
        let importer = args.importer.map(str::to_string);
        let filter = Arc::clone(&self.filter);
        let host = ContextResolve { ctx: ctx.clone() };

        async move {
            // Cheap checks before touching the host resolver.
            if !is_bare_import(&specifier) {
                return Ok(None);
            }
            if !filter
                .is_external(&specifier, importer.as_deref(), &host)
                .await
            {
                return Ok(None);
            }

            Ok(Some(HookResolveIdOutput {
                id: specifier.into(),
                external: Some(ResolvedExternal::Bool(true)),
                side_effects: Some(rolldown_common::side_effects::HookSideEffects::False),
                ..Default::default()
            }))
        }
    }
}

/// Dev-only plugin leaving `require()`-able npm dependencies unbundled.
pub fn not_bundle(options: NotBundleOptions) -> ConfiguredPlugin {
    ConfiguredPlugin::new(Arc::new(NotBundlePlugin::new(options))).serve_only()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_bare_import() {
        assert!(is_bare_import("lodash"));
        assert!(is_bare_import("@scope/pkg"));
        assert!(is_bare_import("electron-store/sub"));
        assert!(is_bare_import("_private"));

        assert!(!is_bare_import("./main"));
        assert!(!is_bare_import("../main"));
        assert!(!is_bare_import("/abs/main"));
        assert!(!is_bare_import("C:/project/main"));
        assert!(!is_bare_import("c:\\project\\main"));
        assert!(!is_bare_import("https://cdn.example.com/x.js"));
        assert!(!is_bare_import(""));
    }

    #[test]
    fn test_non_ascii_specifiers_are_not_bare() {
        assert!(!is_bare_import("é-pkg"));
        assert!(!is_bare_import("٣pkg"));
        assert!(!is_bare_import("пакет/sub"));
        assert!(is_bare_import("3d-utils"));
    }

    #[test]
    fn test_not_bundle_is_serve_only() {
        let plugin = not_bundle(NotBundleOptions::default());
        assert!(plugin.applies_to(crate::host::Command::Serve));
        assert!(!plugin.applies_to(crate::host::Command::Build));
    }
}
