//! credvault: a personal secret vault with per-field public-key encryption.

pub mod backend;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod keys;
pub mod models;
pub mod service;
pub mod utils;

// Re-export commonly used types
pub use backend::{Backend, BackendConfig, BackendKind};
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use keys::{KeyManager, PasswordPrompt, VaultSession};
pub use models::{Database, Item, Payload, PasswordItem, SshItem};
pub use service::Vault;
