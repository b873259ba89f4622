//! SQLite backend: one row per item, one row per registered recipient.

use super::{Backend, BackendKind};
use crate::crypto;
use crate::document::{open_item, seal_payload, SealedItem};
use crate::error::{Result, VaultError};
use crate::keys::VaultSession;
use crate::models::{Item, Meta, UNASSIGNED_ID};
use crate::utils;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    namespace TEXT NOT NULL,
    type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    password BLOB,
    ssh BLOB
);

CREATE TABLE IF NOT EXISTS public_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const ITEM_COLUMNS: &str = "id, title, namespace, type, created_at, updated_at, password, ssh";

/// Item row as stored, secrets still sealed.
struct ItemRow {
    id: i64,
    title: String,
    namespace: String,
    kind: String,
    created_at: String,
    updated_at: String,
    password: Option<Vec<u8>>,
    ssh: Option<Vec<u8>>,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            namespace: row.get(2)?,
            kind: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            password: row.get(6)?,
            ssh: row.get(7)?,
        })
    }

    fn open(self, session: &VaultSession) -> Result<Item> {
        let sealed = SealedItem {
            id: self.id,
            title: self.title,
            namespace: self.namespace,
            kind: self.kind.parse()?,
            meta: Meta {
                created_at: parse_timestamp(&self.created_at)?,
                updated_at: parse_timestamp(&self.updated_at)?,
            },
            password: self
                .password
                .map(|blob| serde_json::from_slice(&blob))
                .transpose()?,
            ssh: self
                .ssh
                .map(|blob| serde_json::from_slice(&blob))
                .transpose()?,
        };
        open_item(sealed, session)
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| VaultError::Encoding(format!("bad timestamp {text:?}: {e}")))
}

/// Writes go straight to the database; flush only closes the connection.
pub struct SqliteBackend {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
        }
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(VaultError::StoreClosed)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(VaultError::StoreClosed)
    }

    fn item_exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row("SELECT id FROM items WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::StructuredStore
    }

    fn init(&mut self, _session: &VaultSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            utils::ensure_private_dir(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %self.path.display(), "opened sqlite store");
        self.conn = Some(conn);
        Ok(())
    }

    fn create_item(&mut self, session: &VaultSession, mut item: Item) -> Result<Item> {
        item.validate()?;
        if item.id < UNASSIGNED_ID {
            return Err(VaultError::Validation(format!("invalid id: {}", item.id)));
        }
        if item.id != UNASSIGNED_ID && self.item_exists(item.id)? {
            return Err(VaultError::Validation(format!(
                "id {} is already in use",
                item.id
            )));
        }

        item.meta = Meta::now();
        let (password, ssh) = seal_payload(&item.payload, session)?;
        let password = password.map(|p| serde_json::to_vec(&p)).transpose()?;
        let ssh = ssh.map(|s| serde_json::to_vec(&s)).transpose()?;
        let id = (item.id != UNASSIGNED_ID).then_some(item.id);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO items (id, title, namespace, type, created_at, updated_at, password, ssh)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                item.title,
                item.namespace,
                item.kind().as_str(),
                item.meta.created_at.to_rfc3339(),
                item.meta.updated_at.to_rfc3339(),
                password,
                ssh,
            ],
        )?;
        let id = conn.last_insert_rowid();

        self.get_item_by_id(session, id)
    }

    fn list_all_items(&self, session: &VaultSession) -> Result<Vec<Item>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY id"))?;
        let rows = stmt
            .query_map([], ItemRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(|row| row.open(session)).collect()
    }

    fn get_item_by_id(&self, session: &VaultSession, id: i64) -> Result<Item> {
        self.conn()?
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id],
                ItemRow::from_row,
            )
            .optional()?
            .ok_or(VaultError::NotFound(id))?
            .open(session)
    }

    fn update_item_by_id(&mut self, _session: &VaultSession, _id: i64, _item: Item) -> Result<Item> {
        Err(VaultError::not_implemented("sqlite", "update item"))
    }

    fn remove_item_by_id(&mut self, _session: &VaultSession, _id: i64) -> Result<Item> {
        Err(VaultError::not_implemented("sqlite", "remove item"))
    }

    fn public_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM public_keys ORDER BY id")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    fn add_public_keys(&mut self, keys: &[String]) -> Result<()> {
        for key in keys {
            crypto::parse_recipient(key)?;
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn_mut()?.transaction()?;
        let mut added = 0;
        for key in keys {
            added += tx.execute(
                "INSERT OR IGNORE INTO public_keys (key, created_at, updated_at)
                 VALUES (?1, ?2, ?2)",
                params![key.trim(), now],
            )?;
        }
        tx.commit()?;
        debug!(added, "registered recipients");
        Ok(())
    }

    fn remove_public_keys(&mut self, _keys: &[String]) -> Result<()> {
        Err(VaultError::not_implemented("sqlite", "remove public keys"))
    }

    fn flush(&mut self, _session: &VaultSession) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| VaultError::Store(e))?;
            debug!(path = %self.path.display(), "closed sqlite store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_identity, recipient_of};
    use crate::models::{Payload, SshItem};
    use tempfile::TempDir;

    fn session() -> VaultSession {
        let identity = generate_identity();
        let recipient = recipient_of(&identity);
        let mut session = VaultSession::new("pw", vec![identity]);
        session.set_recipients(vec![recipient]);
        session
    }

    fn ssh(title: &str, namespace: &str) -> Item {
        Item::new(
            title,
            namespace,
            Payload::Ssh(SshItem {
                host: "example.org".to_string(),
                port: 2222,
                username: "deploy".to_string(),
                password: "hunter2".to_string(),
            }),
        )
    }

    fn open(dir: &TempDir, session: &VaultSession) -> SqliteBackend {
        let mut backend = SqliteBackend::new(dir.path().join("db.sqlite"));
        backend.init(session).unwrap();
        backend
    }

    #[test]
    fn test_create_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = open(&dir, &session);

        let ids: Vec<i64> = ["a", "b", "c"]
            .iter()
            .map(|t| backend.create_item(&session, ssh(t, "ops")).unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        // A second handle sees the rows without any flush.
        let other = open(&dir, &session);
        let items = other.list_all_items(&session).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].title, "b");
        assert_eq!(items[1].secret(), "hunter2");
    }

    #[test]
    fn test_secret_column_is_sealed() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = open(&dir, &session);
        backend.create_item(&session, ssh("box", "ops")).unwrap();

        let blob: Vec<u8> = backend
            .conn()
            .unwrap()
            .query_row("SELECT ssh FROM items WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        let text = String::from_utf8(blob).unwrap();
        assert!(text.contains("example.org"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_validation_and_lookup() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = open(&dir, &session);

        assert!(matches!(
            backend.create_item(&session, ssh("", "ops")),
            Err(VaultError::Validation(_))
        ));
        assert!(backend.list_all_items(&session).unwrap().is_empty());

        let mut explicit = ssh("pinned", "ops");
        explicit.id = 7;
        assert_eq!(backend.create_item(&session, explicit.clone()).unwrap().id, 7);
        assert!(matches!(
            backend.create_item(&session, explicit),
            Err(VaultError::Validation(_))
        ));
        assert_eq!(backend.create_item(&session, ssh("next", "ops")).unwrap().id, 8);

        assert!(matches!(
            backend.get_item_by_id(&session, 99),
            Err(VaultError::NotFound(99))
        ));
    }

    #[test]
    fn test_unimplemented_operations_are_errors() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = open(&dir, &session);

        assert!(matches!(
            backend.update_item_by_id(&session, 1, ssh("x", "y")),
            Err(VaultError::NotImplemented { .. })
        ));
        assert!(matches!(
            backend.remove_item_by_id(&session, 1),
            Err(VaultError::NotImplemented { .. })
        ));
        assert!(matches!(
            backend.remove_public_keys(&[]),
            Err(VaultError::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_public_keys_table() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = open(&dir, &session);

        let extra = recipient_of(&generate_identity());
        backend.add_public_keys(session.recipients()).unwrap();
        backend
            .add_public_keys(&[extra.clone(), session.recipients()[0].clone()])
            .unwrap();

        let keys = backend.public_keys().unwrap();
        assert_eq!(keys, vec![session.recipients()[0].clone(), extra]);
    }

    #[test]
    fn test_flush_closes_store() {
        let dir = TempDir::new().unwrap();
        let session = session();
        let mut backend = open(&dir, &session);

        backend.flush(&session).unwrap();
        backend.flush(&session).unwrap();
        assert!(matches!(
            backend.list_all_items(&session),
            Err(VaultError::StoreClosed)
        ));
    }
}
