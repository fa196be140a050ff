//! Placeholder renderer entry for projects without an HTML entry.
//!
//! An Electron project that only builds main/preload code still runs the host's
//! own build, which needs an entry to resolve. When none is discoverable we
//! write a throwaway `index.html` and remove it once the host bundle closes.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::options::{EntryPoints, InlineConfig};
use crate::{Error, Result};

const PLACEHOLDER_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <title>fob-electron</title>
  </head>
  <body>
    <div>An entry file for electron renderer process.</div>
  </body>
</html>
"#;

/// The entry the host build would start from: explicit input, library entry,
/// or `<root>/index.html`.
pub fn resolve_input(config: &InlineConfig) -> Option<EntryPoints> {
    if let Some(input) = config.input() {
        return Some(input.clone());
    }

    let index = config.root_dir().join("index.html");
    index
        .is_file()
        .then(|| EntryPoints::Single(index.to_string_lossy().into_owned()))
}

/// A generated `index.html`, removed on [`PlaceholderEntry::remove`] or drop.
#[derive(Debug)]
pub struct PlaceholderEntry {
    path: PathBuf,
    removed: bool,
}

impl PlaceholderEntry {
    /// Write the placeholder into `root`.
    pub async fn create(root: &Path) -> Result<Self> {
        let path = root.join("index.html");
        tokio::fs::write(&path, PLACEHOLDER_HTML)
            .await
            .map_err(|e| Error::io_at(format!("Failed to write {}", path.display()), e))?;

        debug!("wrote placeholder entry {}", path.display());
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Calling this more than once is a no-op.
    pub fn remove(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("removed placeholder entry {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_at(
                format!("Failed to remove {}", self.path.display()),
                e,
            )),
        }
    }
}

impl Drop for PlaceholderEntry {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_input_finds_index_html() {
        let dir = tempfile::tempdir().unwrap();
        let config = InlineConfig {
            root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(resolve_input(&config).is_none());

        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        assert!(resolve_input(&config).is_some());
    }

    #[test]
    fn test_resolve_input_prefers_configured_input() {
        let mut config = InlineConfig::default();
        config.build.rolldown_options.input = Some("src/renderer.ts".into());
        assert_eq!(resolve_input(&config), Some("src/renderer.ts".into()));
    }

    #[tokio::test]
    async fn test_placeholder_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let entry = PlaceholderEntry::create(dir.path()).await.unwrap();
            assert!(entry.path().is_file());
            entry.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_placeholder_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = PlaceholderEntry::create(dir.path()).await.unwrap();
        entry.remove().unwrap();
        entry.remove().unwrap();
        assert!(!dir.path().join("index.html").exists());
    }
}
