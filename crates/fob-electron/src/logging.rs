//! Subscriber setup for tools embedding fob-electron.
//!
//! Only compiled with the `logging` feature. Libraries should install their own
//! subscriber; fob-electron itself only emits `tracing` events.

use std::sync::Once;

use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static SUBSCRIBER: Once = Once::new();

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "FOB_ELECTRON_LOG";

/// Verbosity of fob-electron output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Silent,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Accepted spellings; the first one is canonical.
    fn names(self) -> &'static [&'static str] {
        match self {
            LogLevel::Silent => &["silent", "off", "quiet"],
            LogLevel::Error => &["error"],
            LogLevel::Warn => &["warn", "warning"],
            LogLevel::Info => &["info"],
            LogLevel::Debug => &["debug", "verbose"],
            LogLevel::Trace => &["trace"],
        }
    }

    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Silent => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        LogLevel::ALL
            .into_iter()
            .find(|level| level.names().contains(&wanted.as_str()))
            .ok_or_else(|| {
                format!(
                    "unknown log level `{}` (expected silent, error, warn, info, debug or trace)",
                    s
                )
            })
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.names()[0])
    }
}

/// Install a compact stderr subscriber at `level`. `RUST_LOG` directives are
/// layered on top. Only the first call in a process has an effect.
pub fn init_logging(level: LogLevel) {
    SUBSCRIBER.call_once(|| {
        install(
            EnvFilter::builder()
                .with_default_directive(Directive::from(level.filter()))
                .from_env_lossy(),
        )
    });
}

/// Install a subscriber configured from [`LOG_ENV`], then `RUST_LOG`, falling
/// back to `info`.
pub fn init_logging_from_env() {
    SUBSCRIBER.call_once(|| {
        let filter = [LOG_ENV, EnvFilter::DEFAULT_ENV]
            .into_iter()
            .find_map(|var| EnvFilter::try_from_env(var).ok())
            .unwrap_or_else(|| EnvFilter::new(LogLevel::default().to_string()));
        install(filter)
    });
}

fn install(filter: EnvFilter) {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    if tracing_subscriber::registry().with(filter).with(layer).try_init().is_err() {
        tracing::debug!("a global subscriber is already installed");
    }
}
