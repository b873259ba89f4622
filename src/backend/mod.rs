//! Storage backends.
//!
//! Both variants expose the same capability set; which one is used is a
//! configuration value resolved once by [`open_backend`].

mod flat_file;
mod sqlite;

pub use flat_file::FlatFileBackend;
pub use sqlite::SqliteBackend;

use crate::error::Result;
use crate::keys::VaultSession;
use crate::models::Item;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// The two storage variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// One JSON document, rewritten on flush.
    FlatFile,
    /// SQLite, one row per item, written per call.
    #[default]
    StructuredStore,
}

impl BackendKind {
    /// Map a configuration setting to a backend. Anything unrecognised,
    /// including no setting at all, selects the structured store.
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => BackendKind::FlatFile,
            _ => BackendKind::StructuredStore,
        }
    }

    pub fn as_setting(&self) -> &'static str {
        match self {
            BackendKind::FlatFile => "json",
            BackendKind::StructuredStore => "sqlite",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_setting())
    }
}

impl Serialize for BackendKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_setting())
    }
}

impl<'de> Deserialize<'de> for BackendKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let setting = Option::<String>::deserialize(deserializer)?;
        Ok(BackendKind::from_setting(setting.as_deref()))
    }
}

/// Typed backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub path: PathBuf,
}

/// Capability set shared by every storage variant.
///
/// Operations that read or write secrets take the session: sealing uses its
/// recipients, opening uses its identities.
pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Load or open the underlying storage.
    fn init(&mut self, session: &VaultSession) -> Result<()>;

    /// Validate, assign an ID when none is set, stamp timestamps and store.
    fn create_item(&mut self, session: &VaultSession, item: Item) -> Result<Item>;

    fn list_all_items(&self, session: &VaultSession) -> Result<Vec<Item>>;

    fn get_item_by_id(&self, session: &VaultSession, id: i64) -> Result<Item>;

    fn update_item_by_id(&mut self, session: &VaultSession, id: i64, item: Item) -> Result<Item>;

    fn remove_item_by_id(&mut self, session: &VaultSession, id: i64) -> Result<Item>;

    fn public_keys(&self) -> Result<Vec<String>>;

    fn add_public_keys(&mut self, keys: &[String]) -> Result<()>;

    fn remove_public_keys(&mut self, keys: &[String]) -> Result<()>;

    /// Commit pending changes and release what the backend holds.
    fn flush(&mut self, session: &VaultSession) -> Result<()>;
}

/// Construct and initialise the configured backend.
pub fn open_backend(config: &BackendConfig, session: &VaultSession) -> Result<Box<dyn Backend>> {
    let mut backend: Box<dyn Backend> = match config.kind {
        BackendKind::FlatFile => Box::new(FlatFileBackend::new(&config.path)),
        BackendKind::StructuredStore => Box::new(SqliteBackend::new(&config.path)),
    };
    backend.init(session)?;
    tracing::debug!(kind = %config.kind, path = %config.path.display(), "backend ready");
    Ok(backend)
}
