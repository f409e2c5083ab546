#![deny(clippy::all)]

pub mod store;
pub mod stream;

mod crypto;

pub use crate::store::Store;
pub use crate::stream::{CountingWriter, SafeReader, SafeWriter};

pub use crypto::CryptoError;

pub use anyhow;
