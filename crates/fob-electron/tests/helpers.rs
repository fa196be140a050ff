//! Fakes of the host bundler shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fob_electron::{
    BuildPipeline, DevServer, Error, HotChannel, HotPayload, InlineConfig, ListeningCallback,
    Result,
};

/// Pipeline that runs the close hooks of every configuration instead of
/// bundling, optionally after a per-entry delay or failing for some entries.
#[derive(Default)]
pub struct FakePipeline {
    pub built: Mutex<Vec<InlineConfig>>,
    delays: Vec<(String, Duration)>,
    failing: Vec<String>,
}

impl FakePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, entry: &str, delay: Duration) -> Self {
        self.delays.push((entry.to_string(), delay));
        self
    }

    pub fn failing(mut self, entry: &str) -> Self {
        self.failing.push(entry.to_string());
        self
    }

    pub fn built_labels(&self) -> Vec<String> {
        self.built.lock().iter().map(label).collect()
    }

    /// Simulate one more watch rebuild of every configuration seen so far.
    pub async fn rebuild_all(&self) -> Result<()> {
        let configs = self.built.lock().clone();
        for config in configs {
            run_close_hooks(&config).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BuildPipeline for FakePipeline {
    async fn build(&self, config: InlineConfig) -> Result<()> {
        let entry = label(&config);
        self.built.lock().push(config.clone());

        if let Some((_, delay)) = self.delays.iter().find(|(name, _)| *name == entry) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&entry) {
            return Err(Error::Build {
                entry,
                message: "syntax error".to_string(),
            });
        }
        run_close_hooks(&config).await
    }
}

async fn run_close_hooks(config: &InlineConfig) -> Result<()> {
    for hook in &config.close_bundle {
        hook.close_bundle().await?;
    }
    Ok(())
}

pub fn label(config: &InlineConfig) -> String {
    config
        .input()
        .map(|input| input.label())
        .unwrap_or_default()
}

/// Hot channel recording every payload.
#[derive(Default)]
pub struct RecordingHot {
    pub payloads: Mutex<Vec<HotPayload>>,
}

impl HotChannel for RecordingHot {
    fn send(&self, payload: HotPayload) {
        self.payloads.lock().push(payload);
    }
}

/// Dev server whose "listening" event is fired by the test.
pub struct FakeDevServer {
    pub config: InlineConfig,
    pub url: Option<String>,
    pub hot: Arc<RecordingHot>,
    listeners: Mutex<Vec<ListeningCallback>>,
}

impl FakeDevServer {
    pub fn new(config: InlineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            url: Some("http://localhost:5173/".to_string()),
            hot: Arc::new(RecordingHot::default()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub async fn listen(&self) {
        let listeners: Vec<_> = self.listeners.lock().drain(..).collect();
        for listener in listeners {
            listener().await;
        }
    }
}

impl DevServer for FakeDevServer {
    fn config(&self) -> &InlineConfig {
        &self.config
    }

    fn resolved_url(&self) -> Option<String> {
        self.url.clone()
    }

    fn hot(&self) -> Arc<dyn HotChannel> {
        self.hot.clone()
    }

    fn once_listening(&self, callback: ListeningCallback) {
        self.listeners.lock().push(callback);
    }
}
