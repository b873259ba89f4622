//! Key management: master password resolution, the private identity store
//! and the on-disk password cache.

use crate::crypto::{self, Identity, VaultCrypto};
use crate::document::IdentityStore;
use crate::error::{Result, VaultError};
use crate::utils;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Suffix of the random pad stored next to the password cache.
pub const PAD_SUFFIX: &str = ".rnd";
const PAD_LEN: usize = 32;

/// Source of the master password when nothing usable is cached.
pub trait PasswordPrompt {
    fn read_password(&mut self, prompt: &str) -> Result<Zeroizing<String>>;
}

/// Key material for one process: the master password, the unlocked
/// identities and the recipients new secrets are sealed for.
pub struct VaultSession {
    password: Zeroizing<String>,
    identities: Vec<Identity>,
    recipients: Vec<String>,
}

impl VaultSession {
    pub fn new(password: &str, identities: Vec<Identity>) -> Self {
        Self {
            password: Zeroizing::new(password.to_string()),
            identities,
            recipients: Vec::new(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn set_recipients(&mut self, recipients: Vec<String>) {
        self.recipients = recipients;
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("password", &"<redacted>")
            .field("identities", &self.identities.len())
            .field("recipients", &self.recipients)
            .finish()
    }
}

/// Resolves the master password and loads the private identity set.
pub struct KeyManager {
    private_keys: PathBuf,
    cache_path: PathBuf,
    password: Option<Zeroizing<String>>,
    crypto: VaultCrypto,
    cache_crypto: VaultCrypto,
}

impl KeyManager {
    pub fn new(private_keys: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            private_keys: private_keys.into(),
            cache_path: cache_path.into(),
            password: None,
            crypto: VaultCrypto::new(),
            cache_crypto: VaultCrypto::light(),
        }
    }

    /// Replace the Argon2 profile used for the identity store.
    pub fn with_crypto(mut self, crypto: VaultCrypto) -> Self {
        self.crypto = crypto;
        self
    }

    /// Hold `password` in process memory so the next unlock skips the cache
    /// and the prompt.
    pub fn set_password(&mut self, password: &str) {
        self.password = Some(Zeroizing::new(password.to_string()));
    }

    pub fn private_keys_path(&self) -> &Path {
        &self.private_keys
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn pad_path(&self) -> PathBuf {
        utils::with_suffix(&self.cache_path, PAD_SUFFIX)
    }

    pub fn is_initialized(&self) -> bool {
        self.private_keys.exists()
    }

    /// Generate the first identity and write the identity store.
    /// Refuses to overwrite an existing store.
    pub fn create_identity_store(&mut self, password: &str) -> Result<VaultSession> {
        if self.is_initialized() {
            return Err(VaultError::AlreadyInitialized(self.private_keys.clone()));
        }

        let identity = crypto::generate_identity();
        let recipient = crypto::recipient_of(&identity);
        let store = IdentityStore::seal(std::slice::from_ref(&identity), password, &self.crypto)?;
        utils::write_atomic(&self.private_keys, &store.to_json()?)?;
        debug!(path = %self.private_keys.display(), "wrote identity store");

        self.password = Some(Zeroizing::new(password.to_string()));
        let mut session = VaultSession::new(password, vec![identity]);
        session.set_recipients(vec![recipient]);
        Ok(session)
    }

    /// Decrypt every identity in the store with `password`.
    pub fn load_identities(&self, password: &str) -> Result<Vec<Identity>> {
        let bytes = fs::read(&self.private_keys).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::NotInitialized(self.private_keys.clone())
            } else {
                VaultError::io("read", &self.private_keys, e)
            }
        })?;
        IdentityStore::from_json(&bytes)?.open(password, &self.crypto)
    }

    /// Establish the master password and unlock the identity set.
    ///
    /// Order: password already in memory, then the password cache (verified by
    /// loading identities), then `prompt`. A prompted password that fails to
    /// unlock the store is an error; it is not retried.
    pub fn unlock(&mut self, prompt: &mut dyn PasswordPrompt) -> Result<VaultSession> {
        if !self.is_initialized() {
            return Err(VaultError::NotInitialized(self.private_keys.clone()));
        }

        if let Some(password) = &self.password {
            let identities = self.load_identities(password)?;
            return Ok(VaultSession::new(password, identities));
        }

        if let Some(cached) = self.read_cache() {
            match self.load_identities(&cached) {
                Ok(identities) => {
                    debug!("unlocked with cached password");
                    let session = VaultSession::new(&cached, identities);
                    self.password = Some(cached);
                    return Ok(session);
                }
                Err(e) => debug!(error = %e, "cached password rejected"),
            }
        }

        let password = prompt.read_password("Enter your master password: ")?;
        let identities = self.load_identities(&password)?;

        if let Err(e) = self.write_cache(&password) {
            warn!(error = %e, "could not write password cache");
        }
        let session = VaultSession::new(&password, identities);
        self.password = Some(password);
        Ok(session)
    }

    /// Recover the cached password, if the pad and cache files agree.
    pub fn read_cache(&self) -> Option<Zeroizing<String>> {
        let pad = Zeroizing::new(fs::read(self.pad_path()).ok()?);
        let envelope = fs::read(&self.cache_path).ok()?;
        let pad_key = Zeroizing::new(crypto::encode_b64(&pad));

        match self.cache_crypto.decrypt_with_password(&envelope, &pad_key) {
            Ok(plaintext) => std::str::from_utf8(&plaintext)
                .ok()
                .map(|s| Zeroizing::new(s.to_string())),
            Err(_) => {
                debug!(path = %self.cache_path.display(), "password cache unreadable");
                None
            }
        }
    }

    /// Write a fresh pad and the password sealed under it.
    pub fn write_cache(&self, password: &str) -> Result<()> {
        let mut pad = Zeroizing::new(vec![0u8; PAD_LEN]);
        OsRng.fill_bytes(&mut pad);
        let pad_key = Zeroizing::new(crypto::encode_b64(&pad));

        let envelope = self
            .cache_crypto
            .encrypt_with_password(password.as_bytes(), &pad_key)?;

        utils::write_atomic(&self.pad_path(), &pad)?;
        utils::write_atomic(&self.cache_path, &envelope)?;
        Ok(())
    }

    /// Delete both cache files and drop the in-memory password.
    pub fn forget_cache(&mut self) -> Result<()> {
        self.password = None;
        for path in [self.pad_path(), self.cache_path.clone()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(VaultError::io("remove", &path, e)),
            }
        }
        Ok(())
    }
}
