//! Application-local prelude: conveniently import types/functions/macros
//! which are generally useful and should be available in every module with
//! `use crate::prelude::*;

pub use crate::application::APP;
pub use crate::commands::EntryPoint;
pub use crate::config::KeelbackConfig;
pub use abscissa_core::{status_err, Application};
pub use async_trait::async_trait;
pub use clap::Parser as Command;

#[async_trait]
pub trait AsyncRunnable {
    async fn run(&self);
}

pub fn fatal_error(err: impl Into<Box<dyn std::error::Error>>) -> ! {
    status_err!("{} fatal error: {}", APP.name(), err.into());
    std::process::exit(1)
}
