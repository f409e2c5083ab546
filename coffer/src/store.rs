//! Flat object stores: a handful of named blobs and just enough verbs to
//! publish them atomically.

use thiserror::Error;

use std::io::{Read, Write};

mod dryrun;
mod local;
mod s3;
mod sftp;

pub use dryrun::DryRunStore;
pub use local::LocalStore;
pub use s3::S3Store;
pub use sftp::{SftpConfig, SftpStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("No object found: {name}")]
    NotFound { name: String },
    #[error("Store discards writes and cannot be read")]
    WriteOnly,
    #[error("Store error: {source}")]
    Generic {
        #[from]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// An object being written. Nothing is promised to be visible until
/// `complete` returns.
pub trait ObjectWrite: Write + Send {
    fn complete(&mut self) -> Result<()>;
}

pub trait Store: Send + Sync {
    /// Object names, sorted ascending.
    fn list(&self) -> Result<Vec<String>>;

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>>;

    fn create(&self, name: &str) -> Result<Box<dyn ObjectWrite>>;

    /// Atomic at the visibility boundary where the backend allows; only
    /// ever used to publish a finished `.tmp` object.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Removing a missing object is not an error.
    fn delete(&self, name: &str) -> Result<()>;

    fn ping(&self) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(any(test, feature = "test"))]
pub mod test {
    use super::*;
    use std::{
        collections::BTreeMap,
        io::Cursor,
        sync::{Arc, Mutex},
    };

    type Objects = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

    /// Objects live in a shared map; `complete` is the visibility boundary,
    /// just like the real backends.
    #[derive(Clone, Default)]
    pub struct MemoryStore(Objects);

    impl MemoryStore {
        pub fn contains(&self, name: &str) -> bool {
            self.0.lock().unwrap().contains_key(name)
        }

        pub fn object(&self, name: &str) -> Option<Vec<u8>> {
            self.0.lock().unwrap().get(name).cloned()
        }
    }

    struct MemoryObject {
        name: String,
        buf: Vec<u8>,
        objects: Objects,
    }

    impl Write for MemoryObject {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl ObjectWrite for MemoryObject {
        fn complete(&mut self) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(self.name.clone(), std::mem::take(&mut self.buf));
            Ok(())
        }
    }

    impl Store for MemoryStore {
        fn list(&self) -> Result<Vec<String>> {
            Ok(self.0.lock().unwrap().keys().cloned().collect())
        }

        fn open(&self, name: &str) -> Result<Box<dyn Read + Send>> {
            self.0
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .map(|data| Box::new(Cursor::new(data)) as Box<dyn Read + Send>)
                .ok_or_else(|| StoreError::NotFound { name: name.into() })
        }

        fn create(&self, name: &str) -> Result<Box<dyn ObjectWrite>> {
            Ok(Box::new(MemoryObject {
                name: name.into(),
                buf: Vec::new(),
                objects: self.0.clone(),
            }))
        }

        fn rename(&self, from: &str, to: &str) -> Result<()> {
            let mut objects = self.0.lock().unwrap();
            let data = objects
                .remove(from)
                .ok_or_else(|| StoreError::NotFound { name: from.into() })?;
            objects.insert(to.into(), data);
            Ok(())
        }

        fn delete(&self, name: &str) -> Result<()> {
            self.0.lock().unwrap().remove(name);
            Ok(())
        }

        fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn create_is_invisible_until_complete() {
            let store = MemoryStore::default();
            let mut object = store.create("file1").unwrap();
            object.write_all(b"hello world!").unwrap();
            assert!(!store.contains("file1"));

            object.complete().unwrap();
            assert_eq!(store.object("file1").unwrap(), b"hello world!");
        }

        #[test]
        fn list_is_sorted() {
            let store = MemoryStore::default();
            for name in ["b", "a", "c"] {
                let mut object = store.create(name).unwrap();
                object.write_all(name.as_bytes()).unwrap();
                object.complete().unwrap();
            }
            assert_eq!(store.list().unwrap(), vec!["a", "b", "c"]);
        }

        #[test]
        fn rename_and_delete() {
            let store = MemoryStore::default();
            let mut object = store.create("file1.tmp").unwrap();
            object.write_all(b"x").unwrap();
            object.complete().unwrap();

            store.rename("file1.tmp", "file1").unwrap();
            assert_eq!(store.list().unwrap(), vec!["file1"]);

            store.delete("file1").unwrap();
            store.delete("file1").unwrap();
            assert!(store.list().unwrap().is_empty());
        }

        #[test]
        fn open_missing_is_not_found() {
            let store = MemoryStore::default();
            assert!(matches!(
                store.open("bogus"),
                Err(StoreError::NotFound { .. })
            ));
        }
    }
}
