//! Source watcher driving rebuilds of one entry configuration.
//!
//! Watches every root recursively and forwards relevant changes through a
//! channel, ignoring the output directory, `node_modules` and hidden paths.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{Error, Result};

const CHANNEL_CAPACITY: usize = 100;

/// A relevant file change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileChange {
    fn from_event(kind: &EventKind, path: &Path) -> Option<Self> {
        let path = path.to_path_buf();
        match kind {
            EventKind::Create(_) => Some(FileChange::Created(path)),
            EventKind::Modify(_) => Some(FileChange::Modified(path)),
            EventKind::Remove(_) => Some(FileChange::Removed(path)),
            _ => None,
        }
    }

    pub fn path(&self) -> &Path {
        let (FileChange::Modified(path) | FileChange::Created(path) | FileChange::Removed(path)) =
            self;
        path
    }
}

/// Drops a change when the previous one hit the same path within `window`.
struct Debouncer {
    window: Duration,
    last: Option<(PathBuf, Instant)>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    fn admit(&mut self, path: &Path, at: Instant) -> bool {
        let repeated = self.last.as_ref().is_some_and(|(last_path, last_at)| {
            last_path == path && at.saturating_duration_since(*last_at) < self.window
        });
        if !repeated {
            self.last = Some((path.to_path_buf(), at));
        }
        !repeated
    }
}

/// Recursive watcher over a set of roots. Dropping it stops watching.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Start watching `roots`.
    ///
    /// `ignore` holds directories (absolute) or name patterns (`node_modules`,
    /// `*.log`) whose changes are dropped. Changes to the same file within
    /// `debounce_ms` are reported once.
    pub fn new(
        roots: Vec<PathBuf>,
        ignore: Vec<String>,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        let missing: Vec<_> = roots.iter().filter(|root| !root.exists()).collect();
        if !missing.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "Cannot watch missing paths: {:?}",
                missing
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut debouncer = Debouncer::new(Duration::from_millis(debounce_ms));
        let watched_roots = roots.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            let changes = event
                .paths
                .iter()
                .filter(|path| !should_ignore(path, &watched_roots, &ignore))
                .filter_map(|path| FileChange::from_event(&event.kind, path))
                .filter(|change| debouncer.admit(change.path(), Instant::now()));
            for change in changes {
                if tx.blocking_send(change).is_err() {
                    // Receiver gone: the watch loop was aborted.
                    return;
                }
            }
        })?;

        for root in &roots {
            let mode = if root.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher.watch(root, mode)?;
        }

        let watcher = Self {
            _watcher: watcher,
            roots,
        };
        Ok((watcher, rx))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Whether a change to `path` should be dropped.
fn should_ignore(path: &Path, roots: &[PathBuf], ignore: &[String]) -> bool {
    let Some(root) = roots.iter().find(|root| path.starts_with(root)) else {
        return true;
    };
    let rel_path = path.strip_prefix(root).unwrap_or(path);
    let path_str = rel_path.to_string_lossy();

    for pattern in ignore {
        let as_path = Path::new(pattern);
        if as_path.is_absolute() {
            if path.starts_with(as_path) {
                return true;
            }
        } else if let Some(ext) = pattern.strip_prefix('*') {
            if path_str.ends_with(ext) {
                return true;
            }
        } else if rel_path
            .components()
            .any(|component| component.as_os_str() == pattern.as_str())
        {
            return true;
        }
    }

    rel_path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> Vec<PathBuf> {
        vec![PathBuf::from("/project/electron")]
    }

    #[test]
    fn test_ignores_outside_roots() {
        let path = PathBuf::from("/project/src/renderer.ts");
        assert!(should_ignore(&path, &roots(), &[]));
    }

    #[test]
    fn test_ignores_node_modules_and_out_dir() {
        let ignore = vec![
            "node_modules".to_string(),
            "/project/electron/dist-electron".to_string(),
        ];
        assert!(should_ignore(
            Path::new("/project/electron/node_modules/x/index.js"),
            &roots(),
            &ignore
        ));
        assert!(should_ignore(
            Path::new("/project/electron/dist-electron/main.js"),
            &roots(),
            &ignore
        ));
        assert!(!should_ignore(
            Path::new("/project/electron/main.ts"),
            &roots(),
            &ignore
        ));
    }

    #[test]
    fn test_ignores_hidden_and_extension_patterns() {
        let ignore = vec!["*.log".to_string()];
        assert!(should_ignore(
            Path::new("/project/electron/.cache/a.js"),
            &roots(),
            &ignore
        ));
        assert!(should_ignore(
            Path::new("/project/electron/debug.log"),
            &roots(),
            &ignore
        ));
    }

    #[test]
    fn test_debouncer_drops_repeats_within_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        let start = Instant::now();
        let main = Path::new("/project/electron/main.ts");
        let preload = Path::new("/project/electron/preload.ts");

        assert!(debouncer.admit(main, start));
        assert!(!debouncer.admit(main, start + Duration::from_millis(10)));
        assert!(debouncer.admit(preload, start + Duration::from_millis(20)));
        assert!(debouncer.admit(main, start + Duration::from_millis(30)));
        assert!(debouncer.admit(main, start + Duration::from_millis(200)));
    }

    #[test]
    fn test_only_create_modify_remove_are_changes() {
        use notify::event::{AccessKind, CreateKind};
        let path = Path::new("/project/electron/main.ts");
        assert_eq!(
            FileChange::from_event(&EventKind::Create(CreateKind::File), path),
            Some(FileChange::Created(path.to_path_buf()))
        );
        assert!(FileChange::from_event(&EventKind::Access(AccessKind::Any), path).is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_rejected() {
        let result = FileWatcher::new(vec![PathBuf::from("/definitely/not/here")], vec![], 10);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
