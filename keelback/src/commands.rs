//! Keelback Subcommands

mod backup;
use backup::*;
mod dumpindex;
use dumpindex::*;
mod list;
use list::*;
mod listfiles;
use listfiles::*;
mod restore;
use restore::*;
mod showconfig;
use showconfig::*;
mod testconfig;
use testconfig::*;
mod version;
use version::*;

use crate::{config::KeelbackConfig, prelude::*};
use abscissa_core::{Command, Configurable, FrameworkError, Runnable};
use clap::Parser;
use std::path::PathBuf;

/// Keelback Subcommands
/// Subcommands need to be listed in an enum.
#[derive(Debug, Parser)]
pub enum KeelbackCmd {
    /// Write a new backup
    Backup(Backup),

    /// Restore a snapshot into a directory
    Restore(Restore),

    /// List the snapshots on the store
    List(List),

    /// List the files of a snapshot
    #[clap(name = "listfiles")]
    ListFiles(ListFiles),

    /// Print a snapshot's decoded index
    #[clap(name = "dumpindex")]
    DumpIndex(DumpIndex),

    /// Print an example configuration file
    Config(ShowConfig),

    /// Check the configuration and the store connection
    #[clap(name = "testconfig")]
    TestConfig(TestConfig),

    /// Print the version
    Version(Version),
}

/// Encrypted, incremental directory backups.
///
/// Command line arguments take precedence over the configuration file!
#[derive(Command, Debug, Parser)]
#[clap(author, about, version)]
pub struct EntryPoint {
    #[clap(subcommand)]
    cmd: Box<KeelbackCmd>,

    /// Increase log detail
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: usize,

    /// Use config file. The default is the nearest .keelback.conf upward
    #[clap(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// Override the configured store path or prefix
    #[clap(long, value_name = "PATH")]
    pub path: Option<String>,
}

impl Runnable for EntryPoint {
    fn run(&self) {
        use KeelbackCmd::*;
        abscissa_tokio::run(&APP, async move {
            match &*self.cmd {
                Backup(cmd) => cmd.run().await,
                Restore(cmd) => cmd.run().await,
                List(cmd) => cmd.run().await,
                ListFiles(cmd) => cmd.run().await,
                DumpIndex(cmd) => cmd.run().await,
                Config(cmd) => cmd.run().await,
                TestConfig(cmd) => cmd.run().await,
                Version(cmd) => cmd.run().await,
            }
        })
        .unwrap()
    }
}

/// This trait allows you to define how application configuration is loaded.
impl Configurable<KeelbackConfig> for EntryPoint {
    /// Location of the configuration file
    fn config_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(PathBuf::from(path)),
            None => KeelbackConfig::discover(),
        }
    }

    /// Fold command-line overrides into the loaded configuration.
    fn process_config(&self, mut config: KeelbackConfig) -> Result<KeelbackConfig, FrameworkError> {
        if let Some(path) = &self.path {
            config.store.override_path(path);
        }
        Ok(config)
    }
}
