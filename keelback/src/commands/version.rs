//! `version` subcommand

use crate::prelude::*;

#[derive(Command, Debug)]
pub struct Version {}

#[async_trait]
impl AsyncRunnable for Version {
    /// Start the application.
    async fn run(&self) {
        println!("{}", env!("CARGO_PKG_VERSION"));
    }
}
