//! Process tree termination.
//!
//! Electron forks GPU, renderer and utility processes. Killing only the main
//! process leaves those behind. The app is spawned as the leader of its own
//! process group, so signalling the group reaches every helper that stayed in
//! it. Descendants that moved to another session are found by walking the
//! process table and are signalled one by one, deepest first.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

/// Signal sent to a process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TreeSignal {
    Terminate,
    Kill,
}

/// A process group leader plus the descendants seen when it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessTree {
    root: u32,
    /// Children before parents, root excluded.
    descendants: Vec<u32>,
}

impl ProcessTree {
    /// Capture the tree rooted at `root`, which must lead its own process
    /// group. Without a readable process table only the group is signalled.
    pub(crate) fn snapshot(root: u32) -> Self {
        #[cfg(unix)]
        let descendants = {
            use sysinfo::{ProcessesToUpdate, System};

            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::All, true);
            let parents = system.processes().iter().filter_map(|(pid, process)| {
                process
                    .parent()
                    .map(|parent| (pid.as_u32(), parent.as_u32()))
            });
            descendants_post_order(root, parents)
        };
        #[cfg(not(unix))]
        let descendants = Vec::new();

        Self { root, descendants }
    }

    /// The root's process group alone.
    pub(crate) fn group(root: u32) -> Self {
        Self {
            root,
            descendants: Vec::new(),
        }
    }

    /// Signal every captured descendant, then the root's process group.
    /// Processes that already exited are skipped silently.
    pub(crate) fn signal(&self, signal: TreeSignal) {
        debug!(?signal, root = self.root, descendants = ?self.descendants, "signalling process tree");

        #[cfg(unix)]
        {
            let sig = match signal {
                TreeSignal::Terminate => libc::SIGTERM,
                TreeSignal::Kill => libc::SIGKILL,
            };
            for &pid in &self.descendants {
                send_signal(pid, false, sig);
            }
            send_signal(self.root, true, sig);
        }

        #[cfg(windows)]
        {
            // taskkill walks the tree itself; /F is the only reliable way to stop
            // windowed processes from a console parent.
            let _ = signal;
            match std::process::Command::new("taskkill")
                .args(["/pid", &self.root.to_string(), "/T", "/F"])
                .output()
            {
                Ok(output) if !output.status.success() => debug!(
                    "taskkill {} exited with {}: {}",
                    self.root,
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
                Ok(_) => {}
                Err(e) => warn!("failed to run taskkill for pid {}: {}", self.root, e),
            }
        }
    }
}

/// `kill(2)` on `pid`, or on the group it leads. ESRCH is expected for
/// processes that are already gone.
#[cfg(unix)]
fn send_signal(pid: u32, group: bool, sig: libc::c_int) {
    // pid 0, 1 and values beyond i32 would address unrelated processes.
    let Ok(raw) = i32::try_from(pid) else { return };
    if raw <= 1 {
        return;
    }
    let target = if group { -raw } else { raw };

    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(target, sig) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to signal {} {}: {}", if group { "group" } else { "pid" }, pid, err);
        }
    }
}

/// Descendants of `root` from `(pid, parent)` pairs, children before parents.
#[cfg_attr(not(unix), allow(dead_code))]
fn descendants_post_order(root: u32, parents: impl IntoIterator<Item = (u32, u32)>) -> Vec<u32> {
    let mut children: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
    for (pid, parent) in parents {
        if pid != parent {
            children.entry(parent).or_default().push(pid);
        }
    }

    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    collect(root, &children, &mut seen, &mut out);
    out.retain(|&pid| pid != root);
    out
}

#[cfg_attr(not(unix), allow(dead_code))]
fn collect(
    pid: u32,
    children: &FxHashMap<u32, Vec<u32>>,
    seen: &mut FxHashSet<u32>,
    out: &mut Vec<u32>,
) {
    // Pid reuse mid-walk can produce a cycle.
    if !seen.insert(pid) {
        return;
    }
    for &child in children.get(&pid).into_iter().flatten() {
        collect(child, children, seen, out);
    }
    out.push(pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: [(u32, u32); 6] = [(1, 0), (100, 1), (200, 100), (201, 100), (300, 200), (999, 1)];

    #[test]
    fn test_descendants_come_before_parents() {
        assert_eq!(descendants_post_order(100, TABLE), vec![300, 200, 201]);
    }

    #[test]
    fn test_unrelated_processes_are_excluded() {
        assert_eq!(descendants_post_order(200, TABLE), vec![300]);
    }

    #[test]
    fn test_unknown_root_has_no_descendants() {
        assert!(descendants_post_order(4242, TABLE).is_empty());
    }

    #[test]
    fn test_cycles_terminate() {
        assert_eq!(descendants_post_order(10, [(11, 10), (10, 11)]), vec![11]);
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_finds_children_of_a_group_leader() {
        use std::os::unix::process::CommandExt;

        let mut child = std::process::Command::new("/bin/sh")
            .args(["-c", "sleep 30 & wait"])
            .process_group(0)
            .spawn()
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));

        let tree = ProcessTree::snapshot(child.id());
        assert_eq!(tree.descendants.len(), 1);

        tree.signal(TreeSignal::Kill);
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
