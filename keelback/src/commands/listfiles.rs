//! `listfiles` subcommand

use crate::prelude::*;

use chrono::{TimeZone, Utc};
use keelback_files::{index, snapshots};
use tokio::task;

#[derive(Command, Debug)]
pub struct ListFiles {
    /// Print permissions, size, mtime and ownership too
    #[clap(short, long)]
    verbose: bool,

    /// Snapshot to list, or "latest"
    #[clap(short, long, default_value = "latest")]
    name: String,
}

#[async_trait]
impl AsyncRunnable for ListFiles {
    /// Start the application.
    async fn run(&self) {
        let (store, settings) = {
            let config = APP.config();
            if let Err(err) = config.validate() {
                fatal_error(err);
            }
            let store = config.open_store().unwrap_or_else(|err| fatal_error(err));
            (store, config.settings())
        };

        let loaded = {
            let store = store.clone();
            let selector = self.name.clone();
            task::spawn_blocking(move || {
                let chain = snapshots::find_chain(store.as_ref(), &settings.passphrase, &selector)?;
                let index = index::read_index(store.as_ref(), &chain[0], &settings.passphrase)?;
                Ok::<_, snapshots::ChainError>(index)
            })
            .await
        };

        if let Err(err) = store.close() {
            status_err!("closing store: {}", err);
        }

        let index = match loaded {
            Ok(Ok(index)) => index,
            Ok(Err(err)) => fatal_error(err),
            Err(err) => fatal_error(err),
        };

        for file in &index.contents {
            if self.verbose {
                let kind = if file.is_dir {
                    'd'
                } else if file.is_symlink {
                    'l'
                } else {
                    'f'
                };
                let mtime = Utc
                    .timestamp_opt(file.mtime, 0)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| file.mtime.to_string());
                println!(
                    "{} {:03o} {:>12} {} {}:{} {}",
                    kind, file.permissions, file.size, mtime, file.owner, file.group, file.name
                );
            } else {
                println!("{}", file.name);
            }
        }
    }
}
