//! Vault configuration.

use crate::backend::{BackendConfig, BackendKind};
use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used under the home directory when nothing else is given.
pub const DEFAULT_DIR_NAME: &str = ".credvault";

/// Where the vault's artifacts live and which backend stores items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Private identity store.
    pub private_keys: PathBuf,
    /// Password cache; the pad lives next to it with a `.rnd` suffix.
    pub cached_password: PathBuf,
    /// Database file for the selected backend.
    pub database: PathBuf,
    #[serde(default)]
    pub backend: BackendKind,
}

impl VaultConfig {
    /// Default layout rooted at `root`.
    pub fn default_in(root: impl AsRef<Path>, backend: BackendKind) -> Self {
        let root = root.as_ref();
        let database = match backend {
            BackendKind::FlatFile => "db.json",
            BackendKind::StructuredStore => "db.sqlite",
        };
        Self {
            private_keys: root.join("private_keys"),
            cached_password: root.join("cached_pass"),
            database: root.join(database),
            backend,
        }
    }

    /// `~/.credvault`, if a home directory is known.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_DIR_NAME))
    }

    /// Read a TOML config file. Paths starting with `~/` are expanded.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| VaultError::io("read", path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: VaultConfig = toml::from_str(content)?;
        config.private_keys = expand_home(&config.private_keys);
        config.cached_password = expand_home(&config.cached_password);
        config.database = expand_home(&config.database);
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            kind: self.backend,
            path: self.database.clone(),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
