//! Rolldown plugin applying `build.rolldown_options.external`.

use std::borrow::Cow;
use std::sync::Arc;

use rolldown_common::ResolvedExternal;
use rolldown_plugin::{
    HookResolveIdArgs, HookResolveIdOutput, HookResolveIdReturn, HookUsage, Plugin, PluginContext,
};

use crate::options::ExternalPattern;

/// Marks every import matching one of the patterns as external, keeping the
/// specifier as written.
#[derive(Debug, Clone)]
pub struct ExternalsPlugin {
    patterns: Arc<[ExternalPattern]>,
}

impl ExternalsPlugin {
    pub fn new(patterns: Vec<ExternalPattern>) -> Self {
        Self {
            patterns: patterns.into(),
        }
    }

    pub fn is_external(&self, specifier: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(specifier))
    }
}

impl Plugin for ExternalsPlugin {
    fn name(&self) -> Cow<'static, str> {
        "fob-electron:externals".into()
    }

    fn register_hook_usage(&self) -> HookUsage {
        HookUsage::ResolveId
    }

    fn resolve_id(
        &self,
        _ctx: &PluginContext,
        args: &HookResolveIdArgs<'_>,
    ) -> impl std::future::Future<Output = HookResolveIdReturn> + Send {
        let external = self.is_external(args.specifier);
        let specifier = args.specifier.to_string();

        async move {
            if !external {
                return Ok(None);
            }
            Ok(Some(HookResolveIdOutput {
                id: specifier.into(),
                external: Some(ResolvedExternal::Bool(true)),
                ..Default::default()
            }))
        }
    }
}
