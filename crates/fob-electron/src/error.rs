//! Error types for fob-electron.

use std::path::PathBuf;

/// Error types for fob-electron operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An entry build failed inside the build pipeline.
    #[error("Build failed for {entry}: {message}")]
    Build { entry: String, message: String },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be loaded or extracted.
    #[error("Failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The Electron runtime package could not be located.
    #[error("Cannot find runtime package '{package}': {reason}")]
    RuntimeNotFound { package: String, reason: String },

    /// The runtime executable could not be spawned.
    #[error("Failed to spawn {}: {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the control channel of the running app failed.
    #[error("Control channel error: {0}")]
    Ipc(String),

    /// `renderer` was configured but no renderer integration is available.
    #[error("`renderer` option depends on a renderer integration that is not installed")]
    RendererNotInstalled,

    /// The renderer integration itself failed.
    #[error("Renderer integration failed: {0}")]
    Renderer(String),

    /// File watching errors.
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with context message.
    #[error("{message}")]
    IoError {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for fob-electron operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a build error for an entry from any debuggable pipeline error.
    pub fn build(entry: impl Into<String>, error: &dyn std::fmt::Debug) -> Self {
        Error::Build {
            entry: entry.into(),
            message: format!("{:?}", error),
        }
    }

    /// Wrap an I/O error with a message naming the path involved.
    pub fn io_at(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::IoError {
            message: message.into(),
            source,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(error: figment::Error) -> Self {
        Error::Config(Box::new(error))
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::Build { .. } => "BUILD_ERROR",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Config(_) => "CONFIG_ERROR",
            Error::RuntimeNotFound { .. } => "RUNTIME_NOT_FOUND",
            Error::Spawn { .. } => "SPAWN_ERROR",
            Error::Ipc(_) => "IPC_ERROR",
            Error::RendererNotInstalled => "RENDERER_NOT_INSTALLED",
            Error::Renderer(_) => "RENDERER_ERROR",
            Error::Watch(_) => "WATCH_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) | Error::IoError { .. } => "IO_ERROR",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::RuntimeNotFound { package, .. } => Some(Box::new(format!(
                "Install the runtime with `npm i -D {}`, or point `StartupOptions::executable` at a binary.",
                package
            ))),
            Error::RendererNotInstalled => Some(Box::new(
                "Pass a `RendererIntegration` to `electron_simple`, or drop the `renderer` option.",
            )),
            Error::InvalidConfig(msg) => Some(Box::new(format!(
                "Check your electron configuration.\nError: {}",
                msg
            ))),
            Error::Config(_) => Some(Box::new(
                "Check electron.config.json / electron.config.toml syntax and field types.",
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Diagnostic;

    #[test]
    fn test_error_codes() {
        let err = Error::RendererNotInstalled;
        assert_eq!(err.code().unwrap().to_string(), "RENDERER_NOT_INSTALLED");

        let err = Error::build("main", &"boom");
        assert_eq!(err.code().unwrap().to_string(), "BUILD_ERROR");
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn test_runtime_not_found_help_names_package() {
        let err = Error::RuntimeNotFound {
            package: "electron".to_string(),
            reason: "missing".to_string(),
        };
        let help = err.help().unwrap().to_string();
        assert!(help.contains("npm i -D electron"));
    }
}
