//! Flat-file backend: the whole database as one JSON document.

use super::{Backend, BackendKind};
use crate::crypto;
use crate::document::FlatDocument;
use crate::error::{Result, VaultError};
use crate::keys::VaultSession;
use crate::models::{Database, Item};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Holds the decrypted database in memory; changes reach disk on flush.
#[derive(Debug)]
pub struct FlatFileBackend {
    path: PathBuf,
    db: Database,
    backed_up: bool,
}

impl FlatFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            db: Database::new(),
            backed_up: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl Backend for FlatFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FlatFile
    }

    fn init(&mut self, session: &VaultSession) -> Result<()> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no database file yet, starting empty");
                self.db = Database::new();
                return Ok(());
            }
            Err(e) => return Err(VaultError::io("read", &self.path, e)),
        };

        // Flushes rewrite the whole file, so keep the last known good copy.
        if !self.backed_up {
            utils::create_backup(&self.path)?;
            self.backed_up = true;
        }

        self.db = FlatDocument::from_json(&bytes)?.open(session)?;
        Ok(())
    }

    fn create_item(&mut self, _session: &VaultSession, item: Item) -> Result<Item> {
        self.db.add_item(item)
    }

    fn list_all_items(&self, _session: &VaultSession) -> Result<Vec<Item>> {
        Ok(self.db.items().to_vec())
    }

    fn get_item_by_id(&self, _session: &VaultSession, id: i64) -> Result<Item> {
        self.db.find_item(id).cloned()
    }

    fn update_item_by_id(&mut self, _session: &VaultSession, id: i64, item: Item) -> Result<Item> {
        self.db.update_item(id, item)
    }

    fn remove_item_by_id(&mut self, _session: &VaultSession, id: i64) -> Result<Item> {
        self.db.remove_item(id)
    }

    fn public_keys(&self) -> Result<Vec<String>> {
        Ok(self.db.public_keys().to_vec())
    }

    fn add_public_keys(&mut self, keys: &[String]) -> Result<()> {
        for key in keys {
            crypto::parse_recipient(key)?;
        }
        let added = self.db.add_public_keys(keys);
        debug!(added, "registered recipients");
        Ok(())
    }

    fn remove_public_keys(&mut self, _keys: &[String]) -> Result<()> {
        Err(VaultError::not_implemented("json", "remove public keys"))
    }

    fn flush(&mut self, session: &VaultSession) -> Result<()> {
        let document = FlatDocument::seal(&self.db, session)?;
        utils::write_atomic(&self.path, &document.to_json()?)?;
        debug!(path = %self.path.display(), items = self.db.items().len(), "flushed database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_identity, recipient_of};
    use crate::models::{Payload, PasswordItem};
    use tempfile::TempDir;

    fn session() -> VaultSession {
        let identity = generate_identity();
        let recipient = recipient_of(&identity);
        let mut session = VaultSession::new("pw", vec![identity]);
        session.set_recipients(vec![recipient]);
        session
    }

    fn item(title: &str) -> Item {
        Item::new(
            title,
            "work",
            Payload::Password(PasswordItem {
                username: "bob".to_string(),
                site_name: "mail.example".to_string(),
                url: "https://mail.example".to_string(),
                password: "s3cret".to_string(),
            }),
        )
    }

    #[test]
    fn test_changes_need_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let session = session();

        let mut backend = FlatFileBackend::new(&path);
        backend.init(&session).unwrap();
        backend.add_public_keys(session.recipients()).unwrap();
        backend.create_item(&session, item("Mail")).unwrap();
        assert!(!path.exists());

        backend.flush(&session).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Mail"));
        assert!(!raw.contains("s3cret"));

        let mut reopened = FlatFileBackend::new(&path);
        reopened.init(&session).unwrap();
        let items = reopened.list_all_items(&session).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].secret(), "s3cret");
    }

    #[test]
    fn test_init_backs_up_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let session = session();

        let mut backend = FlatFileBackend::new(&path);
        backend.init(&session).unwrap();
        backend.flush(&session).unwrap();

        let mut reopened = FlatFileBackend::new(&path);
        reopened.init(&session).unwrap();

        let backups = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("db.json.backup."))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_remove_and_update() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = FlatFileBackend::new(dir.path().join("db.json"));
        backend.init(&session).unwrap();

        backend.create_item(&session, item("a")).unwrap();
        backend.create_item(&session, item("b")).unwrap();

        let updated = backend.update_item_by_id(&session, 2, item("b2")).unwrap();
        assert_eq!(updated.title, "b2");

        assert!(matches!(
            backend.remove_item_by_id(&session, 5),
            Err(VaultError::NotFound(5))
        ));
        let removed = backend.remove_item_by_id(&session, 1).unwrap();
        assert_eq!(removed.title, "a");
        assert_eq!(backend.list_all_items(&session).unwrap().len(), 1);
        assert!(matches!(
            backend.get_item_by_id(&session, 1),
            Err(VaultError::NotFound(1))
        ));
    }

    #[test]
    fn test_recipient_management() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = FlatFileBackend::new(dir.path().join("db.json"));
        backend.init(&session).unwrap();

        assert!(matches!(
            backend.add_public_keys(&["bogus".to_string()]),
            Err(VaultError::Encoding(_))
        ));
        backend.add_public_keys(session.recipients()).unwrap();
        backend.add_public_keys(session.recipients()).unwrap();
        assert_eq!(backend.public_keys().unwrap(), session.recipients());

        assert!(matches!(
            backend.remove_public_keys(session.recipients()),
            Err(VaultError::NotImplemented { .. })
        ));
    }
}
