//! The index is a snapshot's manifest: the complete effective file list,
//! plus references into earlier snapshots that still own bytes for
//! carried-over files.

use crate::{files::FileMeta, snapshots::Snapshot};

use coffer::{
    store::{Store, StoreError},
    stream::{SafeReader, SafeWriter, StreamError},
};
use secrecy::SecretString;
use thiserror::Error;

use std::io::{Read, Write};

/// Reference to an earlier snapshot whose data blob is still needed.
/// The reference closing the chain carries `terminal = true`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
pub struct SnapshotRef {
    pub terminal: bool,
    pub name: String,
    pub data_size: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Index {
    /// Sealed byte count of the companion data blob.
    pub data_size: u64,
    pub previous: Vec<SnapshotRef>,
    pub contents: Vec<FileMeta>,
    pub add: Vec<String>,
    pub delete: Vec<String>,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("store error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
    #[error("stream error: {source}")]
    Stream {
        #[from]
        source: StreamError,
    },
    #[error("corrupt index: {source}")]
    Corrupt {
        #[from]
        source: rmp_serde::decode::Error,
    },
    #[error("encoding index: {source}")]
    Encode {
        #[from]
        source: rmp_serde::encode::Error,
    },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl Index {
    pub fn to_writer(&self, mut writer: impl Write) -> Result<()> {
        rmp_serde::encode::write(&mut writer, self)?;
        Ok(())
    }

    pub fn from_reader(reader: impl Read) -> Result<Index> {
        Ok(rmp_serde::decode::from_read(reader)?)
    }
}

/// Read and decode a snapshot's index object.
pub fn read_index(
    store: &dyn Store,
    snapshot: &Snapshot,
    passphrase: &SecretString,
) -> Result<Index> {
    let raw = store.open(&snapshot.index_object())?;
    let reader = SafeReader::new(raw, passphrase)?;
    Index::from_reader(reader)
}

/// Encode and seal an index into an already-created store object.
pub fn write_index(
    index: &Index,
    raw: impl Write,
    passphrase: &SecretString,
) -> Result<u64> {
    let counter = coffer::stream::CountingWriter::new(raw);
    let mut writer = SafeWriter::new(counter, passphrase)?;
    index.to_writer(&mut writer)?;
    let counter = writer.finish()?;
    Ok(counter.bytes_written())
}
