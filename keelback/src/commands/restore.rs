//! `restore` subcommand

use crate::prelude::*;

use keelback_files::restore;
use std::process;

#[derive(Command, Debug)]
pub struct Restore {
    #[clap(flatten)]
    options: restore::Options,
}

#[async_trait]
impl AsyncRunnable for Restore {
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

        let result = self.options.run(store.clone(), settings).await;

        if let Err(err) = store.close() {
            status_err!("closing store: {}", err);
        }

        match result {
            Ok(summary) if summary.failed => {
                status_err!("some files could not be restored");
                process::exit(1);
            }
            Ok(_) => {}
            Err(err) => fatal_error(err),
        }
    }
}
