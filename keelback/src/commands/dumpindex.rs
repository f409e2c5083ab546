//! `dumpindex` subcommand

use crate::prelude::*;

use keelback_files::{index, snapshots};
use tokio::task;

#[derive(Command, Debug)]
pub struct DumpIndex {
    /// Snapshot to dump; the newest when omitted
    name: Option<String>,
}

#[async_trait]
impl AsyncRunnable for DumpIndex {
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

        let selector = self.name.clone().unwrap_or_else(|| snapshots::LATEST.into());
        let loaded = {
            let store = store.clone();
            task::spawn_blocking(move || {
                let snapshot = snapshots::find(store.as_ref(), &selector)?;
                let index = index::read_index(store.as_ref(), &snapshot, &settings.passphrase)?;
                Ok::<_, snapshots::ChainError>((snapshot, index))
            })
            .await
        };

        if let Err(err) = store.close() {
            status_err!("closing store: {}", err);
        }

        let (snapshot, index) = match loaded {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(err)) => fatal_error(err),
            Err(err) => fatal_error(err),
        };

        println!("snapshot {} ({})", snapshot.name, snapshot.kind());
        println!("data_size {}", index.data_size);
        for (i, previous) in index.previous.iter().enumerate() {
            println!(
                "previous[{}] name={} data_size={} terminal={}",
                i, previous.name, previous.data_size, previous.terminal
            );
        }
        for file in &index.contents {
            let kind = if file.is_dir {
                'd'
            } else if file.is_symlink {
                'l'
            } else {
                'f'
            };
            println!(
                "{} {:03o} mtime={} size={} offset={} previous={} {}:{} {}",
                kind,
                file.permissions,
                file.mtime,
                file.size,
                file.data_offset
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".into()),
                file.previous_index
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "-".into()),
                file.owner,
                file.group,
                file.name
            );
        }
        for name in &index.add {
            println!("add {}", name);
        }
        for name in &index.delete {
            println!("delete {}", name);
        }
    }
}
