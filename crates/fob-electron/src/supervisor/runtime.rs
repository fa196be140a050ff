//! Locating the runtime executable from its npm package.
//!
//! The `electron` package does not ship the binary path in code we can call.
//! Its installer writes the platform-specific path, relative to `dist/`, into
//! `path.txt` next to `package.json`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Runtime package used when none is configured.
pub const DEFAULT_RUNTIME_PACKAGE: &str = "electron";

/// Environment override for the runtime's `dist` directory.
pub const OVERRIDE_DIST_ENV: &str = "ELECTRON_OVERRIDE_DIST_PATH";

/// Find `node_modules/<package>` walking up from `cwd`, the way Node looks up
/// bare packages.
pub fn find_package_dir(package: &str, cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .map(|dir| dir.join("node_modules").join(package))
        .find(|dir| dir.join("package.json").is_file())
}

/// Resolve the executable of `package` as seen from `cwd`.
pub fn resolve_runtime_executable(package: &str, cwd: &Path) -> Result<PathBuf> {
    let not_found = |reason: String| Error::RuntimeNotFound {
        package: package.to_string(),
        reason,
    };

    let package_dir = find_package_dir(package, cwd).ok_or_else(|| {
        not_found(format!(
            "no node_modules/{} found from {}",
            package,
            cwd.display()
        ))
    })?;

    let path_file = package_dir.join("path.txt");
    let executable = match std::fs::read_to_string(&path_file) {
        Ok(contents) => Some(contents.trim().to_string()).filter(|s| !s.is_empty()),
        Err(_) => None,
    };

    if let Some(dist) = std::env::var_os(OVERRIDE_DIST_ENV) {
        let name = executable.as_deref().unwrap_or(package);
        let resolved = PathBuf::from(dist).join(name);
        debug!("runtime executable from {}: {}", OVERRIDE_DIST_ENV, resolved.display());
        return Ok(resolved);
    }

    match executable {
        Some(executable) => {
            let resolved = package_dir.join("dist").join(executable);
            debug!("runtime executable: {}", resolved.display());
            Ok(resolved)
        }
        None => Err(not_found(format!(
            "{} is missing; the package did not install correctly, delete node_modules/{} and reinstall",
            path_file.display(),
            package
        ))),
    }
}
