//! Command-line interface implementation.

use crate::backend::BackendKind;
use crate::config::VaultConfig;
use crate::error::{Result as VaultResult, VaultError};
use crate::keys::PasswordPrompt;
use crate::models::{Item, Payload, PasswordItem, SshItem};
use crate::service::Vault;
use crate::utils::{self, success, warning};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use dialoguer::Confirm;
use std::io::BufRead;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Environment variable consulted before prompting for the master password.
pub const PASSWORD_ENV: &str = "CREDVAULT_PASSWORD";

/// Personal credential vault.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short = 'c', long, global = true, env = "CREDVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Vault directory used when no config file is given (default: ~/.credvault)
    #[arg(long, global = true, env = "CREDVAULT_HOME")]
    pub home: Option<PathBuf>,

    /// Storage backend
    #[arg(short = 'b', long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    /// Increase log verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackendArg {
    Json,
    Sqlite,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Json => BackendKind::FlatFile,
            BackendArg::Sqlite => BackendKind::StructuredStore,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the identity store and an empty database
    Init,

    /// Add a new item; the secret is prompted for
    Add {
        #[command(subcommand)]
        kind: AddKind,

        /// Read the secret from stdin instead of prompting
        #[arg(short = 'i', long, global = true)]
        stdin: bool,
    },

    /// List items
    List {
        /// Only show items in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List namespaces
    Namespaces,

    /// Show one item
    Show {
        id: i64,

        /// Print the secret instead of masking it
        #[arg(short, long)]
        reveal: bool,
    },

    /// Remove an item
    Rm {
        id: i64,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage recipients allowed to decrypt secrets
    Recipients {
        #[command(subcommand)]
        action: RecipientAction,
    },

    /// Delete the cached master password
    Lock,
}

#[derive(Subcommand, Debug)]
pub enum AddKind {
    /// Website login
    Password {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        namespace: String,
        #[arg(short, long, default_value = "")]
        username: String,
        #[arg(short, long, default_value = "")]
        site: String,
        #[arg(long, default_value = "")]
        url: String,
    },

    /// SSH login
    Ssh {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        namespace: String,
        #[arg(long)]
        host: String,
        #[arg(short, long, default_value_t = 22)]
        port: u16,
        #[arg(short, long, default_value = "")]
        username: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RecipientAction {
    /// Print registered public keys
    List,
    /// Register public keys
    Add { keys: Vec<String> },
}

/// Reads the master password from the environment or the terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn read_password(&mut self, prompt: &str) -> VaultResult<Zeroizing<String>> {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            return Ok(Zeroizing::new(password));
        }
        rpassword::prompt_password(prompt)
            .map(Zeroizing::new)
            .map_err(|e| VaultError::io("read password from", "terminal", e))
    }
}

impl Cli {
    /// Resolve the vault configuration from the flags.
    pub fn vault_config(&self) -> Result<VaultConfig> {
        let mut config = match &self.config {
            Some(path) => VaultConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => {
                let root = match &self.home {
                    Some(home) => home.clone(),
                    None => VaultConfig::default_root()
                        .context("Cannot determine home directory; pass --home")?,
                };
                let kind = self.backend.map(BackendKind::from).unwrap_or_default();
                VaultConfig::default_in(root, kind)
            }
        };
        if let Some(kind) = self.backend {
            config.backend = kind.into();
        }
        Ok(config)
    }

    /// Execute the CLI command.
    pub fn execute(&self) -> Result<()> {
        let config = self.vault_config()?;

        match &self.command {
            Commands::Init => self.init_vault(&config),
            Commands::Add { kind, stdin } => self.add_item(&config, kind, *stdin),
            Commands::List { namespace } => self.list_items(&config, namespace.as_deref()),
            Commands::Namespaces => {
                let vault = self.unlock(&config)?;
                for namespace in vault.namespaces()? {
                    println!("{namespace}");
                }
                Ok(())
            }
            Commands::Show { id, reveal } => self.show_item(&config, *id, *reveal),
            Commands::Rm { id, yes } => self.remove_item(&config, *id, *yes),
            Commands::Recipients { action } => self.recipients(&config, action),
            Commands::Lock => {
                let mut vault = self.unlock(&config)?;
                vault.forget_cached_password()?;
                vault.flush()?;
                success("Cached password removed");
                Ok(())
            }
        }
    }

    fn unlock(&self, config: &VaultConfig) -> Result<Vault> {
        for warning_msg in utils::check_file_permissions(&config.private_keys) {
            warning(&warning_msg);
        }
        Vault::unlock(config, &mut TerminalPrompt).context("Failed to unlock vault")
    }

    fn init_vault(&self, config: &VaultConfig) -> Result<()> {
        let mut prompt = TerminalPrompt;
        let password = prompt.read_password("Enter your master password: ")?;
        if std::env::var(PASSWORD_ENV).is_err() {
            let again = prompt.read_password("Enter your master password (again): ")?;
            if *again != *password {
                return Err(VaultError::PasswordMismatch.into());
            }
        }
        if password.is_empty() {
            bail!("Master password cannot be empty");
        }

        let mut vault = Vault::initialize(config, &password)?;
        let recipients = vault.list_recipients()?;
        vault.flush()?;

        success(&format!(
            "Initialized {} vault at {}",
            config.backend,
            config.database.display()
        ));
        for key in recipients {
            println!("Public key: {}", key.cyan());
        }
        Ok(())
    }

    fn read_secret(&self, from_stdin: bool) -> Result<Zeroizing<String>> {
        let secret = if from_stdin {
            let mut line = Zeroizing::new(String::new());
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read secret from stdin")?;
            Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string())
        } else {
            Zeroizing::new(rpassword::prompt_password("Secret: ").context("Failed to read secret")?)
        };
        if secret.is_empty() {
            return Err(VaultError::Validation("secret can't be empty".to_string()).into());
        }
        Ok(secret)
    }

    fn add_item(&self, config: &VaultConfig, kind: &AddKind, from_stdin: bool) -> Result<()> {
        let mut vault = self.unlock(config)?;
        let secret = self.read_secret(from_stdin)?;

        let item = match kind {
            AddKind::Password {
                title,
                namespace,
                username,
                site,
                url,
            } => Item::new(
                title,
                namespace,
                Payload::Password(PasswordItem {
                    username: username.clone(),
                    site_name: site.clone(),
                    url: url.clone(),
                    password: secret.to_string(),
                }),
            ),
            AddKind::Ssh {
                title,
                namespace,
                host,
                port,
                username,
            } => Item::new(
                title,
                namespace,
                Payload::Ssh(SshItem {
                    host: host.clone(),
                    port: *port,
                    username: username.clone(),
                    password: secret.to_string(),
                }),
            ),
        };

        let stored = vault.create_item(item)?;
        vault.flush()?;
        success(&format!("Added item {} ({})", stored.id, stored.title));
        Ok(())
    }

    fn list_items(&self, config: &VaultConfig, namespace: Option<&str>) -> Result<()> {
        let vault = self.unlock(config)?;
        let items: Vec<Item> = vault
            .list_items()?
            .into_iter()
            .filter(|item| namespace.map_or(true, |ns| item.namespace == ns))
            .collect();

        if items.is_empty() {
            println!("{}", "No items.".dimmed());
            return Ok(());
        }
        for item in items {
            println!("{} {}", format!("ns={}", item.namespace).blue(), item);
        }
        Ok(())
    }

    fn show_item(&self, config: &VaultConfig, id: i64, reveal: bool) -> Result<()> {
        let vault = self.unlock(config)?;
        let item = vault.get_item(id)?;

        println!("{} {}", "Title:".bold(), item.title);
        println!("{} {}", "Namespace:".bold(), item.namespace);
        println!("{} {}", "Type:".bold(), item.kind());
        match &item.payload {
            Payload::Password(p) => {
                println!("{} {}", "Username:".bold(), p.username);
                println!("{} {}", "Site:".bold(), p.site_name);
                if !p.url.is_empty() {
                    println!("{} {}", "URL:".bold(), p.url);
                }
            }
            Payload::Ssh(s) => {
                println!("{} {}", "Connect:".bold(), s);
            }
        }
        println!(
            "{} {}",
            "Updated:".bold(),
            item.meta.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if reveal {
            let secret = vault.get_secret(&item)?;
            println!("{} {}", "Secret:".bold(), secret.as_str());
        } else {
            println!("{} {}", "Secret:".bold(), "********".dimmed());
        }
        Ok(())
    }

    fn remove_item(&self, config: &VaultConfig, id: i64, yes: bool) -> Result<()> {
        let mut vault = self.unlock(config)?;
        let item = vault.get_item(id)?;

        if !yes {
            let confirmed = Confirm::new()
                .with_prompt(format!("Remove item {} ({})?", item.id, item.title))
                .default(false)
                .interact()
                .context("Failed to read confirmation")?;
            if !confirmed {
                return Err(VaultError::Cancelled.into());
            }
        }

        let removed = vault.remove_item(id)?;
        vault.flush()?;
        success(&format!("Removed item {} ({})", removed.id, removed.title));
        Ok(())
    }

    fn recipients(&self, config: &VaultConfig, action: &RecipientAction) -> Result<()> {
        let mut vault = self.unlock(config)?;
        match action {
            RecipientAction::List => {
                for key in vault.list_recipients()? {
                    println!("{key}");
                }
            }
            RecipientAction::Add { keys } => {
                if keys.is_empty() {
                    bail!("No public keys given");
                }
                vault.add_recipients(keys)?;
                vault.flush()?;
                success(&format!("Registered {} public key(s)", keys.len()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["credvault", "list"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from([
            "credvault", "add", "password", "-t", "Mail", "-n", "work", "-u", "bob", "-s",
            "mail.example",
        ]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["credvault", "add", "ssh", "-t", "Box", "-n", "home"]);
        assert!(cli.is_err(), "ssh requires --host");
    }

    #[test]
    fn test_config_from_flags() {
        let cli = Cli::try_parse_from(["credvault", "--home", "/tmp/v", "-b", "json", "list"])
            .unwrap();
        let config = cli.vault_config().unwrap();
        assert_eq!(config.backend, BackendKind::FlatFile);
        assert_eq!(config.database, PathBuf::from("/tmp/v/db.json"));

        let cli = Cli::try_parse_from(["credvault", "--home", "/tmp/v", "list"]).unwrap();
        assert_eq!(
            cli.vault_config().unwrap().backend,
            BackendKind::StructuredStore
        );
    }
}
