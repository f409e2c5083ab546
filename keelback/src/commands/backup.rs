//! `backup` subcommand

use crate::prelude::*;

use chrono::Utc;
use keelback_files::{backup, snapshots};
use std::process;

#[derive(Command, Debug)]
pub struct Backup {
    #[clap(flatten)]
    options: backup::Options,
}

#[async_trait]
impl AsyncRunnable for Backup {
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

        // the name is fixed up front; it doubles as the creation timestamp
        let name = snapshots::new_name(Utc::now());
        let result = self.options.run(store.clone(), settings, name).await;

        if let Err(err) = store.close() {
            status_err!("closing store: {}", err);
        }

        match result {
            Ok(summary) if summary.failed => {
                status_err!(
                    "backup {} was written, but some files could not be stored",
                    summary.name
                );
                process::exit(1);
            }
            Ok(_) => {}
            Err(err) => fatal_error(err),
        }
    }
}
