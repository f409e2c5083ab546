//! `list` subcommand

use crate::prelude::*;

use keelback_files::snapshots;
use tokio::task;

#[derive(Command, Debug)]
pub struct List {}

#[async_trait]
impl AsyncRunnable for List {
    /// Start the application.
    async fn run(&self) {
        let store = {
            let config = APP.config();
            if let Err(err) = config.validate() {
                fatal_error(err);
            }
            config.open_store().unwrap_or_else(|err| fatal_error(err))
        };

        let listing = {
            let store = store.clone();
            task::spawn_blocking(move || snapshots::list(store.as_ref())).await
        };

        if let Err(err) = store.close() {
            status_err!("closing store: {}", err);
        }

        match listing {
            Ok(Ok(snapshots)) => {
                for snapshot in snapshots {
                    println!("{}\t{}", snapshot.name, snapshot.kind());
                }
            }
            Ok(Err(err)) => fatal_error(err),
            Err(err) => fatal_error(err),
        }
    }
}
