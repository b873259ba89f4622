//! Error types for credvault.

use crate::crypto::CryptoError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Item not found: id={0}")]
    NotFound(i64),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Decryption failed")]
    Decryption,

    #[error("Operation not implemented by the {backend} backend: {operation}")]
    NotImplemented {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("IO error while trying to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store has already been flushed and closed")]
    StoreClosed,

    #[error("Vault already initialized: {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Vault not initialized: {0} is missing")]
    NotInitialized(PathBuf),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Operation cancelled by user")]
    Cancelled,
}

impl VaultError {
    /// Wrap an IO error with the operation and path that produced it.
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        VaultError::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn not_implemented(backend: &'static str, operation: &'static str) -> Self {
        VaultError::NotImplemented { backend, operation }
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed
            | CryptoError::InvalidIdentity
            | CryptoError::InvalidBase64 => VaultError::Decryption,
            other => VaultError::Encoding(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VaultError {
    fn from(err: toml::de::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
