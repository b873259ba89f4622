//! Service layer: the operations callers use to work with an unlocked vault.

use crate::backend::{open_backend, Backend, BackendConfig, BackendKind};
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::keys::{KeyManager, PasswordPrompt, VaultSession};
use crate::models::{namespaces, Item};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// An unlocked vault bound to one storage backend.
pub struct Vault {
    keys: KeyManager,
    session: VaultSession,
    backend: Box<dyn Backend>,
}

impl Vault {
    /// Create a new vault: generate the first identity, write the identity
    /// store and register its public key as the only recipient.
    ///
    /// Nothing reaches the database file until [`Vault::flush`].
    pub fn initialize(config: &VaultConfig, password: &str) -> Result<Self> {
        let keys = KeyManager::new(&config.private_keys, &config.cached_password);
        Self::initialize_with(keys, &config.backend_config(), password)
    }

    pub fn initialize_with(
        mut keys: KeyManager,
        backend: &BackendConfig,
        password: &str,
    ) -> Result<Self> {
        if backend.path.exists() {
            return Err(VaultError::AlreadyInitialized(backend.path.clone()));
        }

        let mut session = keys.create_identity_store(password)?;
        let recipients = session.recipients().to_vec();

        let mut backend = open_backend(backend, &session)?;
        backend.add_public_keys(&recipients)?;
        session.set_recipients(backend.public_keys()?);

        if let Err(e) = keys.write_cache(password) {
            warn!(error = %e, "could not write password cache");
        }

        Ok(Self {
            keys,
            session,
            backend,
        })
    }

    /// Unlock an existing vault, prompting for the master password only when
    /// no verified cached password is available.
    pub fn unlock(config: &VaultConfig, prompt: &mut dyn PasswordPrompt) -> Result<Self> {
        let keys = KeyManager::new(&config.private_keys, &config.cached_password);
        Self::unlock_with(keys, &config.backend_config(), prompt)
    }

    pub fn unlock_with(
        mut keys: KeyManager,
        backend: &BackendConfig,
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<Self> {
        let mut session = keys.unlock(prompt)?;
        let backend = open_backend(backend, &session)?;
        session.set_recipients(backend.public_keys()?);
        debug!(recipients = session.recipients().len(), "vault unlocked");

        Ok(Self {
            keys,
            session,
            backend,
        })
    }

    pub fn session(&self) -> &VaultSession {
        &self.session
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Store a new item and return it with its assigned ID.
    pub fn create_item(&mut self, item: Item) -> Result<Item> {
        self.backend.create_item(&self.session, item)
    }

    pub fn list_items(&self) -> Result<Vec<Item>> {
        self.backend.list_all_items(&self.session)
    }

    pub fn get_item(&self, id: i64) -> Result<Item> {
        self.backend.get_item_by_id(&self.session, id)
    }

    pub fn update_item(&mut self, id: i64, item: Item) -> Result<Item> {
        self.backend.update_item_by_id(&self.session, id, item)
    }

    pub fn remove_item(&mut self, id: i64) -> Result<Item> {
        self.backend.remove_item_by_id(&self.session, id)
    }

    /// The decrypted password of whichever payload the item carries.
    pub fn get_secret(&self, item: &Item) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(item.secret().to_string()))
    }

    /// Distinct namespaces across all items, sorted.
    pub fn namespaces(&self) -> Result<Vec<String>> {
        Ok(namespaces(&self.list_items()?))
    }

    pub fn list_recipients(&self) -> Result<Vec<String>> {
        self.backend.public_keys()
    }

    /// Register more recipients. Secrets sealed from now on are readable by
    /// each of them.
    pub fn add_recipients(&mut self, keys: &[String]) -> Result<()> {
        self.backend.add_public_keys(keys)?;
        self.session.set_recipients(self.backend.public_keys()?);
        Ok(())
    }

    pub fn remove_recipients(&mut self, keys: &[String]) -> Result<()> {
        self.backend.remove_public_keys(keys)?;
        self.session.set_recipients(self.backend.public_keys()?);
        Ok(())
    }

    /// Commit pending changes.
    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush(&self.session)
    }

    /// Delete the password cache so the next unlock prompts again.
    pub fn forget_cached_password(&mut self) -> Result<()> {
        self.keys.forget_cache()
    }
}
