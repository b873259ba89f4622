//! Persisted forms of vault data.
//!
//! Items are sealed explicitly on the way out and opened explicitly on the way
//! in; nothing here encrypts as a side effect of serde.

use crate::crypto::{self, Identity, VaultCrypto};
use crate::error::{Result, VaultError};
use crate::keys::VaultSession;
use crate::models::{Database, Item, ItemKind, Meta, Payload, PasswordItem, SshItem};
use age::secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

/// Password payload with its secret replaced by a base64 recipient envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedPasswordItem {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub password: String,
}

/// SSH payload with its secret replaced by a base64 recipient envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedSshItem {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    pub password: String,
}

/// An item as written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedItem {
    pub id: i64,
    pub title: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SealedPasswordItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SealedSshItem>,
}

fn seal_secret(secret: &str, recipients: &[String]) -> Result<String> {
    let envelope = crypto::encrypt_field(secret.as_bytes(), recipients)?;
    Ok(crypto::encode_b64(&envelope))
}

fn open_secret(sealed: &str, identities: &[Identity]) -> Result<String> {
    let envelope = crypto::decode_b64(sealed)?;
    let plaintext = crypto::decrypt_field(&envelope, identities)?;
    std::str::from_utf8(&plaintext)
        .map(str::to_string)
        .map_err(|_| VaultError::Decryption)
}

/// Seal a payload for the session's recipients. Exactly one side of the
/// returned pair is populated.
pub fn seal_payload(
    payload: &Payload,
    session: &VaultSession,
) -> Result<(Option<SealedPasswordItem>, Option<SealedSshItem>)> {
    let recipients = session.recipients();
    Ok(match payload {
        Payload::Password(p) => (
            Some(SealedPasswordItem {
                username: p.username.clone(),
                site_name: p.site_name.clone(),
                url: p.url.clone(),
                password: seal_secret(&p.password, recipients)?,
            }),
            None,
        ),
        Payload::Ssh(s) => (
            None,
            Some(SealedSshItem {
                host: s.host.clone(),
                port: s.port,
                username: s.username.clone(),
                password: seal_secret(&s.password, recipients)?,
            }),
        ),
    })
}

/// Encrypt an item's secret for storage.
pub fn seal_item(item: &Item, session: &VaultSession) -> Result<SealedItem> {
    let (password, ssh) = seal_payload(&item.payload, session)?;
    Ok(SealedItem {
        id: item.id,
        title: item.title.clone(),
        namespace: item.namespace.clone(),
        kind: item.kind(),
        meta: item.meta,
        password,
        ssh,
    })
}

/// Decrypt a stored item with the session's identities.
pub fn open_item(sealed: SealedItem, session: &VaultSession) -> Result<Item> {
    let identities = session.identities();
    let payload = match (sealed.kind, sealed.password, sealed.ssh) {
        (ItemKind::Password, Some(p), None) => Payload::Password(PasswordItem {
            password: open_secret(&p.password, identities)?,
            username: p.username,
            site_name: p.site_name,
            url: p.url,
        }),
        (ItemKind::Ssh, None, Some(s)) => Payload::Ssh(SshItem {
            password: open_secret(&s.password, identities)?,
            host: s.host,
            port: s.port,
            username: s.username,
        }),
        _ => {
            return Err(VaultError::Encoding(format!(
                "item {} must carry exactly one payload matching its type",
                sealed.id
            )))
        }
    };

    Ok(Item {
        id: sealed.id,
        title: sealed.title,
        namespace: sealed.namespace,
        meta: sealed.meta,
        payload,
    })
}

/// The flat-file database document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatDocument {
    #[serde(default)]
    pub public_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<i64>,
    #[serde(default)]
    pub items: Vec<SealedItem>,
}

impl FlatDocument {
    /// Seal every item of `db`.
    pub fn seal(db: &Database, session: &VaultSession) -> Result<Self> {
        let items = db
            .items()
            .iter()
            .map(|item| seal_item(item, session))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            public_keys: db.public_keys().to_vec(),
            next_id: Some(db.next_id()),
            items,
        })
    }

    /// Open every item into an in-memory database.
    pub fn open(self, session: &VaultSession) -> Result<Database> {
        let items = self
            .items
            .into_iter()
            .map(|sealed| open_item(sealed, session))
            .collect::<Result<Vec<_>>>()?;
        Database::from_parts(self.public_keys, items, self.next_id)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// The private identity store: each key is a password envelope of an
/// `AGE-SECRET-KEY-1...` string, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityStore {
    #[serde(rename = "metadata", alias = "meta")]
    pub meta: Meta,
    #[serde(default)]
    pub keys: Vec<String>,
}

impl IdentityStore {
    pub fn seal(identities: &[Identity], password: &str, crypto: &VaultCrypto) -> Result<Self> {
        let keys = identities
            .iter()
            .map(|identity| {
                crypto
                    .encrypt_string(identity.to_string().expose_secret(), password)
                    .map_err(VaultError::from)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            meta: Meta::now(),
            keys,
        })
    }

    /// Decrypt every key. Any failure aborts the whole load.
    pub fn open(&self, password: &str, crypto: &VaultCrypto) -> Result<Vec<Identity>> {
        if self.keys.is_empty() {
            return Err(VaultError::Encoding(
                "identity store holds no keys".to_string(),
            ));
        }
        self.keys
            .iter()
            .map(|key| -> Result<Identity> {
                let text = crypto.decrypt_string(key, password)?;
                Ok(crypto::parse_identity(&text)?)
            })
            .collect()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
