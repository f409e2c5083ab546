//! `testconfig` subcommand

use crate::prelude::*;

use tokio::task;

#[derive(Command, Debug)]
pub struct TestConfig {}

#[async_trait]
impl AsyncRunnable for TestConfig {
    /// Start the application.
    async fn run(&self) {
        let store = {
            let config = APP.config();
            if let Err(err) = config.validate() {
                fatal_error(err);
            }
            config.open_store().unwrap_or_else(|err| fatal_error(err))
        };
        let pinged = {
            let store = store.clone();
            task::spawn_blocking(move || store.ping()).await
        };

        if let Err(err) = store.close() {
            status_err!("closing store: {}", err);
        }

        match pinged {
            Ok(Ok(())) => println!("config OK"),
            Ok(Err(err)) => fatal_error(err),
            Err(err) => fatal_error(err),
        }
    }
}
