//! Keelback Config
//!
//! The configuration file is `.keelback.conf`, found by walking up the
//! directory hierarchy from the working directory, so a backup can be
//! started from anywhere inside the tree it covers.

use anyhow::{bail, Context, Result};
use coffer::store::{LocalStore, S3Store, SftpConfig, SftpStore, Store};
use keelback_files::{settings::CONFIG_FILE, Settings};
use secrecy::Secret;
use serde::{Deserialize, Serialize};

use std::{env, path::PathBuf, sync::Arc};

/// Keelback Configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeelbackConfig {
    /// Whitelist of paths to back up; everything when empty. Directories
    /// match with a trailing slash, the root as the empty string.
    #[serde(default)]
    pub include: Vec<String>,

    /// Blacklist of paths, applied even to whitelisted files.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Incremental backups between full backups. For a weekly full with
    /// daily backups, set this to 6.
    #[serde(default)]
    pub incrementals_per_full: u32,

    /// Full backups to keep; older backups are removed after a backup.
    #[serde(default)]
    pub full_keep: u32,

    /// Number of past full backups for which incrementals are kept too.
    #[serde(default)]
    pub incremental_for_full_keep: u32,

    /// Encrypts every object written to the store.
    #[serde(default)]
    pub passphrase: String,

    /// Where backups live.
    pub store: StoreConfig,
}

impl Default for KeelbackConfig {
    fn default() -> KeelbackConfig {
        KeelbackConfig {
            include: Vec::new(),
            exclude: Vec::new(),
            incrementals_per_full: 0,
            full_keep: 0,
            incremental_for_full_keep: 0,
            passphrase: String::new(),
            store: StoreConfig::Local {
                path: String::new(),
            },
        }
    }
}

/// Backend configuration; exactly one store backs a configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Use a directory on a locally mounted file system
    #[serde(rename = "local")]
    #[allow(missing_docs)]
    Local { path: String },

    /// Use an S3-compatible bucket
    #[serde(rename = "s3")]
    S3 {
        /// Name of the bucket to store backups in
        bucket: String,
        /// Region name; any name works together with `endpoint`
        region: String,
        /// `protocol://host` of a non-AWS S3 service
        #[serde(default)]
        endpoint: Option<String>,
        /// Access key id
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Key prefix inside the bucket; empty or ending in a slash
        #[serde(default)]
        prefix: String,
    },

    /// Use an sftp server
    #[serde(rename = "sftp")]
    Sftp {
        /// `host:port` of the ssh server
        address: String,
        /// User to log in as
        user: String,
        /// Password to log in with; either this or `private_key`
        #[serde(default)]
        password: Option<String>,
        /// Private key material to log in with
        #[serde(default)]
        private_key: Option<String>,
        /// Server keys in single-line known-hosts format, e.g. from
        /// ssh-keyscan
        host_public_keys: Vec<String>,
        /// Remote directory to store backups in
        #[serde(default)]
        path: String,
    },
}

impl StoreConfig {
    /// Open the configured store.
    pub fn open(&self) -> Result<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match self {
            StoreConfig::Local { path } => Arc::new(LocalStore::new(path)?),
            StoreConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key,
                secret_key,
                prefix,
            } => Arc::new(
                S3Store::new(
                    bucket.clone(),
                    region,
                    endpoint.as_deref(),
                    access_key.clone(),
                    secret_key.clone(),
                    prefix.clone(),
                )
                .context("failed to open S3 store")?,
            ),
            StoreConfig::Sftp {
                address,
                user,
                password,
                private_key,
                host_public_keys,
                path,
            } => Arc::new(
                SftpStore::connect(&SftpConfig {
                    address: address.clone(),
                    user: user.clone(),
                    password: password.clone(),
                    private_key: private_key.clone(),
                    host_public_keys: host_public_keys.clone(),
                    path: path.clone(),
                })
                .context("failed to open sftp store")?,
            ),
        };
        Ok(store)
    }

    /// Point the store somewhere else, from the command line.
    pub fn override_path(&mut self, new: &str) {
        match self {
            StoreConfig::Local { path } => *path = new.into(),
            StoreConfig::S3 { prefix, .. } => *prefix = new.into(),
            StoreConfig::Sftp { path, .. } => *path = new.into(),
        }
    }
}

impl KeelbackConfig {
    /// The knobs the engines consume.
    pub fn settings(&self) -> Settings {
        Settings {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            incrementals_per_full: self.incrementals_per_full,
            full_keep: self.full_keep,
            incremental_for_full_keep: self.incremental_for_full_keep,
            passphrase: Secret::new(self.passphrase.clone()),
        }
    }

    /// Reject broken configurations before any store I/O happens.
    pub fn validate(&self) -> Result<()> {
        match &self.store {
            StoreConfig::Local { path } if path.is_empty() => {
                bail!(
                    "no store configured; create a {} (see `keelback config`) or pass --config",
                    CONFIG_FILE
                )
            }
            StoreConfig::S3 { prefix, .. } => {
                if !prefix.is_empty() && !prefix.ends_with('/') {
                    bail!("store.prefix must be empty or end with a slash");
                }
            }
            StoreConfig::Sftp {
                password,
                private_key,
                host_public_keys,
                ..
            } => {
                if password.is_none() && private_key.is_none() {
                    bail!("sftp needs a password or a private_key");
                }
                if host_public_keys.is_empty() {
                    bail!("sftp needs at least one host public key; try ssh-keyscan");
                }
            }
            _ => {}
        }
        self.settings().validate()?;
        Ok(())
    }

    /// Open the configured store.
    pub fn open_store(&self) -> Result<Arc<dyn Store>> {
        self.store.open()
    }

    /// Nearest config file, walking up from the working directory.
    pub fn discover() -> Option<PathBuf> {
        let mut dir = env::current_dir().ok()?;
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

/// Printed by `keelback config` as a starting point.
pub const EXAMPLE: &str = r#"# Keelback configuration. Save as .keelback.conf in the directory you
# back up; every command searches for it upward from where it runs.

# Encrypts everything written to the store. Losing it means losing the
# backups.
passphrase = "change me"

# Optional whitelist/blacklist of paths, as regular expressions matched
# against store-relative paths. Directories match with a trailing slash.
#include = ["^src/", "\\.rs$"]
#exclude = ["\\.tmp$", "^target/"]

# Six incrementals per full means a weekly full with daily backups.
incrementals_per_full = 6

# Keep four fulls; keep incrementals for the two most recent of them.
full_keep = 4
incremental_for_full_keep = 2

[store]
type = "local"
path = "/var/backups/keelback"

# Or an S3-compatible bucket:
#[store]
#type = "s3"
#bucket = "my-backups"
#region = "eu-west-1"
#access_key = "AKIA..."
#secret_key = "..."
#prefix = "host1/"

# Or an sftp server:
#[store]
#type = "sftp"
#address = "backup.example.com:22"
#user = "backup"
#password = "..."
#host_public_keys = ["backup.example.com ssh-ed25519 AAAA..."]
#path = "backups/host1"
"#;
