#[macro_use]
extern crate serde_derive;

mod files;
pub use files::*;

pub mod cleanup;
pub mod format;
pub mod index;
pub mod settings;
pub mod snapshots;

mod ops;
pub use ops::{backup, restore, retention};

pub use settings::Settings;
