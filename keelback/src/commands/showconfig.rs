//! `config` subcommand

use crate::prelude::*;

#[derive(Command, Debug)]
pub struct ShowConfig {}

#[async_trait]
impl AsyncRunnable for ShowConfig {
    /// Start the application.
    async fn run(&self) {
        print!("{}", crate::config::EXAMPLE);
    }
}
