use super::{ObjectWrite, Result, Store, StoreError};

use std::io::{self, Read, Write};

/// Accepts and discards every write; refuses reads. Lets a backup run
/// end-to-end without touching the real store.
#[derive(Clone, Default)]
pub struct DryRunStore;

struct NullObject;

impl Write for NullObject {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWrite for NullObject {
    fn complete(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Store for DryRunStore {
    fn list(&self) -> Result<Vec<String>> {
        Err(StoreError::WriteOnly)
    }

    fn open(&self, _name: &str) -> Result<Box<dyn Read + Send>> {
        Err(StoreError::WriteOnly)
    }

    fn create(&self, _name: &str) -> Result<Box<dyn ObjectWrite>> {
        Ok(Box::new(NullObject))
    }

    fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _name: &str) -> Result<()> {
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
    fn writes_vanish_reads_fail() {
        let store = DryRunStore;

        let mut object = store.create("file1").unwrap();
        object.write_all(b"into the void").unwrap();
        object.complete().unwrap();

        assert!(matches!(store.open("file1"), Err(StoreError::WriteOnly)));
        assert!(matches!(store.list(), Err(StoreError::WriteOnly)));
        store.rename("file1.tmp", "file1").unwrap();
        store.delete("file1").unwrap();
    }
}
