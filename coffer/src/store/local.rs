use super::{ObjectWrite, Result, Store, StoreError};

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

/// Backups in a directory on a locally mounted file system.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Result<LocalStore> {
        fs::create_dir_all(&root)?;
        Ok(LocalStore {
            root: root.as_ref().into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

struct LocalObject {
    file: File,
}

impl Write for LocalObject {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ObjectWrite for LocalObject {
    fn complete(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

impl Store for LocalStore {
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        match File::open(self.root.join(name)) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound { name: name.into() })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn create(&self, name: &str) -> Result<Box<dyn ObjectWrite>> {
        let file = File::create(self.root.join(name))?;
        Ok(Box::new(LocalObject { file }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.root.join(from), self.root.join(to))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn ping(&self) -> Result<()> {
        fs::metadata(&self.root)?;
        Ok(())
    }
}
