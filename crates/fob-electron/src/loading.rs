//! Loading entry options from `electron.config.{json,toml}`.
//!
//! Priority: `FOB_ELECTRON_*` environment variables > config file > defaults.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format as _, Json, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::options::ElectronOptions;
use crate::{Error, Result};

/// Config files looked up in the project root, in order.
pub const CONFIG_FILES: [&str; 2] = ["electron.config.json", "electron.config.toml"];

/// Prefix of environment overrides, e.g. `FOB_ELECTRON_MODE=development`.
pub const ENV_PREFIX: &str = "FOB_ELECTRON_";

/// Contents of an electron config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectronConfigFile {
    #[serde(default)]
    pub entries: Vec<ElectronOptions>,

    /// Mode applied to entries that do not set one.
    #[serde(default)]
    pub mode: Option<String>,

    /// Out dir applied to entries that do not set one.
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
}

impl ElectronConfigFile {
    /// Load from `path`, or from the first of [`CONFIG_FILES`] found in `root`.
    pub fn load(root: &Path, path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = path.map(|p| root.join(p)).or_else(|| {
            CONFIG_FILES
                .iter()
                .map(|name| root.join(name))
                .find(|candidate| candidate.is_file())
        });

        if let Some(file) = &config_file {
            if !file.is_file() {
                return Err(Error::InvalidConfig(format!(
                    "Config file not found: {}",
                    file.display()
                )));
            }
            debug!("loading electron config from {}", file.display());
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(file)),
                _ => figment.merge(Json::file(file)),
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract()?;
        Ok(config)
    }

    /// Entries with the file-level defaults and the root applied.
    pub fn into_entries(self, root: &Path) -> Vec<ElectronOptions> {
        let Self {
            entries,
            mode,
            out_dir,
        } = self;

        entries
            .into_iter()
            .map(|mut entry| {
                let config = &mut entry.config;
                if config.root.is_none() {
                    config.root = Some(root.to_path_buf());
                }
                if config.mode.is_none() {
                    config.mode = mode.clone();
                }
                if config.build.out_dir.is_none() {
                    config.build.out_dir = out_dir.clone();
                }
                entry
            })
            .collect()
    }
}

/// Entry options configured for the project at `root`.
pub fn load_options(root: &Path) -> Result<Vec<ElectronOptions>> {
    let entries = ElectronConfigFile::load(root, None)?.into_entries(root);
    if entries.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "No electron entries configured in {}",
            root.display()
        )));
    }
    Ok(entries)
}
