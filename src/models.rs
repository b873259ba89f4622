//! Data models for the credential vault.
//!
//! Everything here holds plaintext. Encryption happens only when items cross
//! the persistence boundary, see [`crate::document`].

use crate::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Identifier of an item that has not been stored yet.
pub const UNASSIGNED_ID: i64 = 0;

/// Type tag of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Password,
    Ssh,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Password => "password",
            ItemKind::Ssh => "ssh",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "password" => Ok(ItemKind::Password),
            "ssh" => Ok(ItemKind::Ssh),
            other => Err(VaultError::Encoding(format!("unknown item type: {other}"))),
        }
    }
}

/// Creation and update timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meta {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::now()
    }
}

/// Website login.
#[derive(Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
pub struct PasswordItem {
    pub username: String,
    pub site_name: String,
    pub url: String,
    pub password: String,
}

impl fmt::Debug for PasswordItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordItem")
            .field("username", &self.username)
            .field("site_name", &self.site_name)
            .field("url", &self.url)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for PasswordItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={} site={}", self.username, self.site_name)
    }
}

/// SSH login.
#[derive(Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
pub struct SshItem {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SshItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshItem")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for SshItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ssh -p {} {}@{}", self.port, self.username, self.host)
    }
}

/// The secret-bearing part of an item. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Password(PasswordItem),
    Ssh(SshItem),
}

impl Payload {
    pub fn kind(&self) -> ItemKind {
        match self {
            Payload::Password(_) => ItemKind::Password,
            Payload::Ssh(_) => ItemKind::Ssh,
        }
    }

    /// The plaintext secret of whichever variant is populated.
    pub fn secret(&self) -> &str {
        match self {
            Payload::Password(p) => &p.password,
            Payload::Ssh(s) => &s.password,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Password(p) => fmt::Display::fmt(p, f),
            Payload::Ssh(s) => fmt::Display::fmt(s, f),
        }
    }
}

/// A single vault entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Unique within the database; [`UNASSIGNED_ID`] until stored.
    pub id: i64,
    pub title: String,
    pub namespace: String,
    pub meta: Meta,
    pub payload: Payload,
}

impl Item {
    /// Create an item that has not been stored yet.
    pub fn new(title: impl Into<String>, namespace: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: UNASSIGNED_ID,
            title: title.into(),
            namespace: namespace.into(),
            meta: Meta::now(),
            payload,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.payload.kind()
    }

    pub fn secret(&self) -> &str {
        self.payload.secret()
    }

    /// Reject items that may not be stored.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(VaultError::Validation("title can't be empty".to_string()));
        }
        if self.namespace.trim().is_empty() {
            return Err(VaultError::Validation(
                "namespace can't be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<3} {:<28} {}",
            self.id,
            format!("{:?}", truncate_on_space(&self.title, 25)),
            self.payload
        )
    }
}

/// Cut `text` at the last whitespace before `max_chars`, adding an ellipsis.
/// Text without whitespace is left intact.
pub fn truncate_on_space(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .take(max_chars)
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .last();
    match cut {
        Some(idx) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Distinct namespaces of `items`, sorted.
pub fn namespaces(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|i| i.namespace.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Registered recipients plus all items, held in memory.
///
/// IDs come from a counter that only moves forward, so an ID freed by a
/// removal is never handed out again.
#[derive(Debug, Clone)]
pub struct Database {
    public_keys: Vec<String>,
    items: Vec<Item>,
    next_id: i64,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            public_keys: Vec::new(),
            items: Vec::new(),
            next_id: 1,
        }
    }
}

impl Database {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a database from persisted parts. A missing counter is derived
    /// from the highest stored ID.
    pub fn from_parts(
        public_keys: Vec<String>,
        items: Vec<Item>,
        next_id: Option<i64>,
    ) -> Result<Self> {
        let highest = items.iter().map(|i| i.id).max().unwrap_or(0);
        let floor = highest
            .checked_add(1)
            .ok_or_else(|| VaultError::Encoding(format!("stored id {highest} is out of range")))?;
        Ok(Self {
            public_keys,
            items,
            next_id: next_id.map_or(floor, |n| n.max(floor)),
        })
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn public_keys(&self) -> &[String] {
        &self.public_keys
    }

    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// Append recipients not yet registered. Returns how many were added.
    pub fn add_public_keys(&mut self, keys: &[String]) -> usize {
        let mut added = 0;
        for key in keys {
            let key = key.trim();
            if !self.public_keys.iter().any(|k| k == key) {
                self.public_keys.push(key.to_string());
                added += 1;
            }
        }
        added
    }

    /// Store a new item, assigning an ID when none is set.
    pub fn add_item(&mut self, mut item: Item) -> Result<Item> {
        item.validate()?;

        if item.id == UNASSIGNED_ID {
            item.id = self.next_id;
        } else if item.id < 0 {
            return Err(VaultError::Validation(format!("invalid id: {}", item.id)));
        } else if self.items.iter().any(|i| i.id == item.id) {
            return Err(VaultError::Validation(format!(
                "id {} is already in use",
                item.id
            )));
        }
        let after = item
            .id
            .checked_add(1)
            .ok_or_else(|| VaultError::Validation(format!("id {} is out of range", item.id)))?;
        self.next_id = self.next_id.max(after);

        item.meta = Meta::now();
        self.items.push(item.clone());
        Ok(item)
    }

    pub fn find_item(&self, id: i64) -> Result<&Item> {
        self.items
            .iter()
            .find(|i| i.id == id)
            .ok_or(VaultError::NotFound(id))
    }

    /// Replace title, namespace and payload of an item, keeping its ID and
    /// creation time.
    pub fn update_item(&mut self, id: i64, update: Item) -> Result<Item> {
        update.validate()?;

        let existing = self
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(VaultError::NotFound(id))?;

        existing.title = update.title;
        existing.namespace = update.namespace;
        existing.payload = update.payload;
        existing.meta.updated_at = Utc::now();
        Ok(existing.clone())
    }

    pub fn remove_item(&mut self, id: i64) -> Result<Item> {
        let idx = self
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or(VaultError::NotFound(id))?;
        Ok(self.items.remove(idx))
    }

    pub fn namespaces(&self) -> Vec<String> {
        namespaces(&self.items)
    }
}
