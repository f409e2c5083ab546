//! The restore engine: project the effective file set of a snapshot,
//! then stream file bodies out of each owning snapshot's data blob in a
//! single sequential pass per blob.

use crate::{
    files::{self, FileMeta},
    index::{self, IndexError},
    settings::{self, match_any, Settings, SettingsError},
    snapshots::{self, ChainError},
};

use coffer::store::{Store, StoreError};
use coffer::stream::{SafeReader, StreamError};
use tokio::task;
use tracing::{debug, warn};

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(thiserror::Error, Debug)]
pub enum RestoreError {
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
    #[error("index error: {source}")]
    Index {
        #[from]
        source: IndexError,
    },
    #[error("resolving backup chain: {source}")]
    Chain {
        #[from]
        source: ChainError,
    },
    #[error("corrupt index: {name} references previous snapshot {reference} of {count}")]
    DanglingReference {
        name: String,
        reference: usize,
        count: usize,
    },
    #[error("corrupt index: overlapping data ranges at {name}")]
    Overlap { name: String },
    #[error("short read: {name} needs bytes {offset}..{end} of {snapshot}, which holds {data_size}")]
    ShortRead {
        name: String,
        offset: u64,
        end: u64,
        snapshot: String,
        data_size: u64,
    },
    #[error("invalid settings: {source}")]
    Settings {
        #[from]
        source: SettingsError,
    },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("background task failed: {source}")]
    Task {
        #[from]
        source: task::JoinError,
    },
}

pub type Result<T> = std::result::Result<T, RestoreError>;

#[derive(clap::Args, Debug, Clone)]
pub struct Options {
    /// Print files as they are restored
    #[clap(short, long)]
    pub verbose: bool,

    /// Snapshot to restore, or "latest"
    #[clap(short, long, default_value = "latest")]
    pub name: String,

    /// Directory to restore into
    pub destination: PathBuf,

    /// Restore only paths matching these patterns
    pub paths: Vec<String>,
}

#[derive(Debug)]
pub struct Summary {
    pub files: u64,
    /// Some files could not be written; the run should exit non-zero.
    pub failed: bool,
}

impl Options {
    pub async fn run(&self, store: Arc<dyn Store>, settings: Settings) -> Result<Summary> {
        let options = self.clone();
        task::spawn_blocking(move || extract(options, store, settings)).await?
    }
}

type DataStream = SafeReader<Box<dyn Read + Send>>;

struct Blob<'a> {
    snapshot: &'a str,
    data_size: u64,
}

fn extract(options: Options, store: Arc<dyn Store>, settings: Settings) -> Result<Summary> {
    let patterns = settings::compile(&options.paths)?;

    let chain = snapshots::find_chain(store.as_ref(), &settings.passphrase, &options.name)?;
    let head = &chain[0];
    let index = index::read_index(store.as_ref(), head, &settings.passphrase)?;

    let selected: Vec<&FileMeta> = index
        .contents
        .iter()
        .filter(|f| patterns.is_empty() || match_any(&patterns, &f.name))
        .collect();

    fs::create_dir_all(&options.destination)?;

    // directories first, so every file write finds its parent
    for dir in selected.iter().filter(|f| f.is_dir) {
        if dir.name != "." {
            fs::create_dir_all(options.destination.join(&dir.name))?;
        }
    }

    // bodies grouped by the snapshot that owns them
    let mut own: Vec<&FileMeta> = Vec::new();
    let mut carried: HashMap<usize, Vec<&FileMeta>> = HashMap::new();
    for file in selected.iter().copied().filter(|f| !f.is_dir) {
        match file.previous_index {
            None => own.push(file),
            Some(reference) => carried.entry(reference).or_default().push(file),
        }
    }

    let mut failed = false;
    let mut restored = 0u64;

    restore_group(
        store.as_ref(),
        &settings,
        Blob {
            snapshot: &head.name,
            data_size: index.data_size,
        },
        own,
        &options,
        &mut failed,
        &mut restored,
    )?;

    for (reference, files) in carried {
        let previous =
            index
                .previous
                .get(reference)
                .ok_or_else(|| RestoreError::DanglingReference {
                    name: files[0].name.clone(),
                    reference,
                    count: index.previous.len(),
                })?;
        restore_group(
            store.as_ref(),
            &settings,
            Blob {
                snapshot: &previous.name,
                data_size: previous.data_size,
            },
            files,
            &options,
            &mut failed,
            &mut restored,
        )?;
    }

    // directory metadata last, children before parents, so a read-only
    // directory cannot get in its own children's way
    let mut dirs: Vec<&FileMeta> = selected.iter().filter(|f| f.is_dir).copied().collect();
    dirs.sort_by(|a, b| b.name.cmp(&a.name));
    for dir in dirs {
        let target = target_path(&options.destination, &dir.name);
        if let Err(err) = apply_metadata(&target, dir, false) {
            warn!("restoring metadata of {}: {}", dir.name, err);
            failed = true;
        }
    }

    Ok(Summary {
        files: restored,
        failed,
    })
}

fn restore_group(
    store: &dyn Store,
    settings: &Settings,
    blob: Blob<'_>,
    mut files: Vec<&FileMeta>,
    options: &Options,
    failed: &mut bool,
    restored: &mut u64,
) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    files.sort_by_key(|f| f.data_offset);

    // containment first; a record pointing outside its blob means the
    // index cannot be trusted
    for file in files.iter().copied() {
        let offset = file.data_offset.unwrap_or(0);
        if offset + file.size > blob.data_size {
            return Err(short_read(file, &blob));
        }
    }

    let data_object = format!("{}.data", blob.snapshot);
    let raw = match store.open(&data_object) {
        Ok(raw) => raw,
        Err(StoreError::NotFound { .. }) => {
            return Err(ChainError::Broken {
                name: blob.snapshot.to_string(),
            }
            .into())
        }
        Err(err) => return Err(err.into()),
    };
    let mut stream: DataStream = SafeReader::new(raw, &settings.passphrase)?;
    let mut pos: u64 = 0;

    for file in files {
        let offset = file.data_offset.unwrap_or(0);
        if offset < pos {
            return Err(RestoreError::Overlap {
                name: file.name.clone(),
            });
        }
        if offset > pos {
            io::copy(&mut (&mut stream).take(offset - pos), &mut io::sink())?;
        }

        let target = target_path(&options.destination, &file.name);
        if file.is_symlink {
            match emit_symlink(&mut stream, file, &target, &blob) {
                Ok(None) => {
                    if options.verbose {
                        println!("{}", file.name);
                    }
                    *restored += 1;
                }
                Ok(Some(err)) => {
                    warn!("restoring {}: {}", file.name, err);
                    *failed = true;
                }
                Err(fatal) => return Err(fatal),
            }
        } else {
            match emit_file(&mut stream, file, &target, &blob) {
                Ok(None) => {
                    if options.verbose {
                        println!("{}", file.name);
                    }
                    *restored += 1;
                }
                Ok(Some(err)) => {
                    warn!("restoring {}: {}", file.name, err);
                    *failed = true;
                }
                Err(fatal) => return Err(fatal),
            }
        }

        pos = offset + file.size;
    }

    Ok(())
}

fn short_read(file: &FileMeta, blob: &Blob<'_>) -> RestoreError {
    let offset = file.data_offset.unwrap_or(0);
    RestoreError::ShortRead {
        name: file.name.clone(),
        offset,
        end: offset + file.size,
        snapshot: blob.snapshot.to_string(),
        data_size: blob.data_size,
    }
}

fn target_path(destination: &Path, name: &str) -> PathBuf {
    if name == "." {
        destination.to_path_buf()
    } else {
        destination.join(name)
    }
}

/// Write one file body from the stream. Stream trouble is fatal; trouble
/// with the target file is reported and the stream is drained so later
/// files stay aligned.
fn emit_file(
    stream: &mut DataStream,
    meta: &FileMeta,
    target: &Path,
    blob: &Blob<'_>,
) -> Result<Option<io::Error>> {
    let mut write_err = None;
    let mut out = match create_target(target) {
        Ok(file) => Some(file),
        Err(err) => {
            write_err = Some(err);
            None
        }
    };

    let mut remaining = meta.size;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(short_read(meta, blob));
        }
        if let Some(file) = out.as_mut() {
            if let Err(err) = file.write_all(&buf[..n]) {
                write_err = Some(err);
                out = None;
            }
        }
        remaining -= n as u64;
    }

    if write_err.is_none() {
        drop(out);
        if let Err(err) = apply_metadata(target, meta, false) {
            write_err = Some(err);
        }
    }

    Ok(write_err)
}

fn emit_symlink(
    stream: &mut DataStream,
    meta: &FileMeta,
    target: &Path,
    blob: &Blob<'_>,
) -> Result<Option<io::Error>> {
    use std::os::unix::ffi::OsStrExt;

    let mut buf = vec![0u8; meta.size as usize];
    if let Err(err) = stream.read_exact(&mut buf) {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Err(short_read(meta, blob));
        }
        return Err(err.into());
    }

    let link = std::ffi::OsStr::from_bytes(&buf);
    let result = (|| {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::symlink_metadata(target).is_ok() {
            fs::remove_file(target)?;
        }
        std::os::unix::fs::symlink(link, target)?;
        apply_metadata(target, meta, true)
    })();

    Ok(result.err())
}

fn create_target(target: &Path) -> io::Result<File> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(target)
}

fn apply_metadata(path: &Path, meta: &FileMeta, symlink: bool) -> io::Result<()> {
    use nix::sys::stat::{utimensat, UtimensatFlags};
    use nix::sys::time::{TimeSpec, TimeValLike};
    use nix::unistd::{fchownat, FchownatFlags};
    use std::os::unix::fs::PermissionsExt;

    // ownership is advisory; without privileges this quietly stays as-is
    let (uid, gid) = files::user_group_ids(&meta.owner, &meta.group);
    if uid.is_some() || gid.is_some() {
        let flags = if symlink {
            FchownatFlags::NoFollowSymlink
        } else {
            FchownatFlags::FollowSymlink
        };
        if let Err(err) = fchownat(None, path, uid, gid, flags) {
            debug!("chown {}: {}", path.display(), err);
        }
    }

    if !symlink {
        fs::set_permissions(path, fs::Permissions::from_mode(meta.permissions))?;
    }

    let ts = TimeSpec::seconds(meta.mtime);
    let flags = if symlink {
        UtimensatFlags::NoFollowSymlink
    } else {
        UtimensatFlags::FollowSymlink
    };
    utimensat(None, path, &ts, &ts, flags)?;
    Ok(())
}
