//! Host bundler plugin protocol.
//!
//! fob-electron does not own a dev server or an HTML pipeline. The host drives
//! the lifecycle through [`HostPlugin`] hooks and exposes its dev server through
//! [`DevServer`]. Everything here is a seam: the host implements the server and
//! hot channel, fob-electron implements the plugins.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::options::InlineConfig;

/// The host command a plugin applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Dev server (`fob dev`).
    Serve,
    /// Production build.
    Build,
}

/// Environment the host passes to the `config` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEnv {
    pub command: Command,
    pub mode: String,
}

impl ConfigEnv {
    pub fn new(command: Command, mode: impl Into<String>) -> Self {
        Self {
            command,
            mode: mode.into(),
        }
    }
}

/// Lifecycle hooks a host bundler calls on its plugins.
///
/// All hooks have no-op defaults. Hosts must honour [`HostPlugin::applies_to`]
/// before calling any hook; nothing here relies on the host filtering by mode
/// implicitly.
#[async_trait]
pub trait HostPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Command this plugin is restricted to, `None` for both.
    fn apply(&self) -> Option<Command> {
        None
    }

    fn applies_to(&self, command: Command) -> bool {
        self.apply().is_none_or(|apply| apply == command)
    }

    /// Called with the user config before the host resolves it.
    fn config(&self, _config: &mut InlineConfig, _env: &ConfigEnv) {}

    /// Called once the host config is final.
    async fn config_resolved(&self, _config: &InlineConfig) -> Result<()> {
        Ok(())
    }

    /// Called when the host has created (not yet started) its dev server.
    fn configure_server(&self, _server: Arc<dyn DevServer>) {}

    /// Called after the host finished writing its bundle, on success or failure.
    async fn close_bundle(&self) -> Result<()> {
        Ok(())
    }
}

/// Callback run once when the dev server starts listening.
pub type ListeningCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The host's dev server as seen by plugins.
pub trait DevServer: Send + Sync {
    /// Resolved host configuration.
    fn config(&self) -> &InlineConfig;

    /// Local URL the server listens on, once known.
    fn resolved_url(&self) -> Option<String>;

    /// Live-reload channel to connected clients.
    fn hot(&self) -> Arc<dyn HotChannel>;

    /// Register a callback for the first "listening" event. Fires at most once
    /// per server start.
    fn once_listening(&self, callback: ListeningCallback);
}

/// Payload pushed to live-reload clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HotPayload {
    FullReload,
    Custom {
        event: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// Host live-reload channel (websocket, SSE, ...).
pub trait HotChannel: Send + Sync {
    fn send(&self, payload: HotPayload);
}

/// Hot channel that drops every payload, for builds without a dev server.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHotChannel;

impl HotChannel for NoopHotChannel {
    fn send(&self, _payload: HotPayload) {}
}

/// Terminal pipeline stage, run after every completed bundling pass of one
/// build configuration (initial build and every watch rebuild).
#[async_trait]
pub trait CloseBundleHook: Send + Sync {
    fn name(&self) -> &str;

    async fn close_bundle(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn CloseBundleHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CloseBundleHook").field(&self.name()).finish()
    }
}

/// Shared handle to a close hook, as stored in [`InlineConfig::close_bundle`].
pub type SharedCloseBundle = Arc<dyn CloseBundleHook>;
