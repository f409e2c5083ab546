//! The backup engine: walk a directory, decide full vs. incremental,
//! write changed file bodies into a fresh data blob, carry unchanged
//! files by reference, and publish the index as the commit point.

use crate::{
    cleanup,
    files::FileMeta,
    format,
    index::{self, Index, IndexError, SnapshotRef},
    settings::{match_any, Settings, SettingsError, CONFIG_FILE},
    snapshots::{self, Snapshot},
};

use coffer::store::{DryRunStore, Store, StoreError};
use coffer::stream::{CountingWriter, SafeWriter, StreamError};
use regex::Regex;
use tokio::task;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(thiserror::Error, Debug)]
pub enum BackupError {
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
    #[error("walk error: {source}")]
    Walk {
        #[from]
        source: walkdir::Error,
    },
    #[error("storing {path}: {source}")]
    Content { path: PathBuf, source: io::Error },
    #[error("storing {path}: expected to write {expected} bytes, only wrote {actual}")]
    ShortSource {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("invalid settings: {source}")]
    Settings {
        #[from]
        source: SettingsError,
    },
    #[error("can only back up directories: {0}")]
    NotADirectory(PathBuf),
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

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(clap::Args, Debug, Clone, Default)]
pub struct Options {
    /// Print files as they are stored
    #[clap(short, long)]
    pub verbose: bool,

    /// Walk and classify, but do not write to the store
    #[clap(long)]
    pub dryrun: bool,

    /// Directory to back up
    pub directory: Option<PathBuf>,
}

/// What a finished run looked like; `failed` means some entries were
/// skipped non-fatally and retention was not run.
#[derive(Debug)]
pub struct Summary {
    pub name: String,
    pub incremental: bool,
    pub files: u64,
    pub logical_bytes: u64,
    pub stored_bytes: u64,
    pub added: usize,
    pub deleted: usize,
    pub failed: bool,
}

impl Options {
    pub async fn run(
        &self,
        store: Arc<dyn Store>,
        settings: Settings,
        name: String,
    ) -> Result<Summary> {
        let options = self.clone();
        task::spawn_blocking(move || create(options, store, settings, name)).await?
    }
}

struct Earlier {
    previous: SnapshotRef,
    used: bool,
}

fn create(
    options: Options,
    store: Arc<dyn Store>,
    settings: Settings,
    name: String,
) -> Result<Summary> {
    settings.validate()?;
    let includes = settings.include_patterns()?;
    let excludes = settings.exclude_patterns()?;

    let dir = options.directory.clone().unwrap_or_else(|| ".".into());
    let dir = fs::canonicalize(&dir)?;
    if !dir.is_dir() {
        return Err(BackupError::NotADirectory(dir));
    }

    // Full or incremental? A trailing run of incrementals shorter than
    // the configured window is extended; otherwise start a new full.
    let mut incremental = false;
    let mut oidx = None;
    let mut previous_name = String::new();
    if settings.incrementals_per_full > 0 {
        let all = snapshots::list(store.as_ref())?;
        if let Some(latest) = snapshots::extend_target(&all, settings.incrementals_per_full) {
            incremental = true;
            previous_name = latest.name.clone();
            oidx = Some(index::read_index(
                store.as_ref(),
                latest,
                &settings.passphrase,
            )?);
        }
    }

    let store: Arc<dyn Store> = if options.dryrun {
        Arc::new(DryRunStore)
    } else {
        store
    };
    let partials = cleanup::watch(store.clone());

    // Carryover bookkeeping: every file of the previous snapshot starts
    // out unseen, and `earliers` holds the previous snapshot's own
    // references plus the previous snapshot itself at the end. References
    // that stay unused are dropped before the index is written.
    let mut unseen: HashMap<String, FileMeta> = HashMap::new();
    let mut earliers: Vec<Earlier> = Vec::new();
    if let Some(old) = &oidx {
        for file in &old.contents {
            unseen.insert(file.name.clone(), file.clone());
        }
        for previous in &old.previous {
            earliers.push(Earlier {
                previous: previous.clone(),
                used: false,
            });
        }
        earliers.push(Earlier {
            previous: SnapshotRef {
                terminal: true,
                name: previous_name,
                data_size: old.data_size,
            },
            used: false,
        });
    }

    let snapshot = Snapshot {
        name: name.clone(),
        incremental,
    };

    let data_object = snapshot.data_object();
    let raw = store.create(&data_object)?;
    partials.register(&data_object);
    let counter = CountingWriter::new(raw);
    let mut data = SafeWriter::new(counter, &settings.passphrase)?;

    let mut filter = PathFilter::new(includes, excludes);
    let mut nidx = Index::default();
    let mut failed = false;
    let mut data_offset: u64 = 0;

    let mut walker = WalkDir::new(&dir).sort_by_file_name().into_iter();
    while let Some(result) = walker.next() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                // a permission error somewhere we meant to skip anyway is
                // not worth reporting
                if let Some(path) = err.path() {
                    if let Ok(rel) = path.strip_prefix(&dir) {
                        let rel_str = rel.to_string_lossy();
                        let is_dir = fs::symlink_metadata(path)
                            .map(|m| m.is_dir())
                            .unwrap_or(true);
                        if filter.skip(&match_path_for(&rel_str, is_dir), is_dir, false) {
                            continue;
                        }
                    }
                }
                if err.io_error().map(demotable).unwrap_or(false) {
                    warn!("error walking: {}, continuing with error", err);
                    failed = true;
                    continue;
                }
                return Err(err.into());
            }
        };

        let path = entry.path();
        let rel = match path.strip_prefix(&dir) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let rel_str = match rel.to_str() {
            Some(s) => s.to_string(),
            None => {
                warn!("skipping {}: not valid UTF-8", path.display());
                failed = true;
                continue;
            }
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                if err.io_error().map(demotable).unwrap_or(false) {
                    warn!(
                        "error walking {}: {}, continuing with error",
                        path.display(),
                        err
                    );
                    failed = true;
                    continue;
                }
                return Err(err.into());
            }
        };

        let is_dir = metadata.is_dir();
        let rel_name = if rel_str.is_empty() {
            ".".to_string()
        } else {
            rel_str.clone()
        };
        let match_path = match_path_for(&rel_str, is_dir);

        if rel_name == CONFIG_FILE || rel_name.ends_with(&format!("/{}", CONFIG_FILE)) {
            continue;
        }

        if filter.skip(&match_path, is_dir, options.verbose) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        {
            use std::os::unix::fs::FileTypeExt;
            let file_type = metadata.file_type();
            if file_type.is_block_device()
                || file_type.is_char_device()
                || file_type.is_fifo()
                || file_type.is_socket()
            {
                debug!("skipping special file {}", rel_name);
                continue;
            }
        }

        let mut meta = FileMeta::from_walk(&rel_name, &metadata);

        // with a whitelist, only matching directories are worth recording;
        // they are still walked for matching descendants
        if is_dir && !filter.keeps_dir(&match_path) {
            continue;
        }

        let mut replaced = None;
        let mut is_new = false;
        if incremental {
            match unseen.remove(&rel_name) {
                Some(old) if !old.changed(&meta) => {
                    if !meta.is_dir {
                        meta.data_offset = old.data_offset;
                        // old indices are against the previous snapshot's
                        // reference list; the previous snapshot itself sits
                        // at the end of `earliers`
                        let slot = old.previous_index.unwrap_or(earliers.len() - 1);
                        meta.previous_index = Some(slot);
                        earliers[slot].used = true;
                    }
                    nidx.contents.push(meta);
                    continue;
                }
                Some(old) => replaced = Some(old),
                None => is_new = true,
            }
        }

        if options.verbose && (is_new || !incremental) {
            println!("{}", rel_name);
        }

        if !meta.is_dir {
            meta.data_offset = Some(data_offset);
            let written = if meta.is_symlink {
                match fs::read_link(path) {
                    Ok(target) => {
                        use std::os::unix::ffi::OsStrExt;
                        let buf = target.as_os_str().as_bytes().to_vec();
                        data.write_all(&buf)?;
                        buf.len() as u64
                    }
                    Err(err) if demotable(&err) => {
                        warn!(
                            "reading link {}: {}, continuing with error",
                            path.display(),
                            err
                        );
                        failed = true;
                        if let Some(old) = replaced {
                            unseen.insert(rel_name, old);
                        }
                        continue;
                    }
                    Err(err) => {
                        return Err(BackupError::Content {
                            path: path.into(),
                            source: err,
                        })
                    }
                }
            } else {
                match store_file(path, meta.size, &mut data) {
                    Ok(written) => written,
                    Err(ContentError::Skip(err)) => {
                        warn!(
                            "storing {}: {}, continuing with error",
                            path.display(),
                            err
                        );
                        failed = true;
                        if let Some(old) = replaced {
                            unseen.insert(rel_name, old);
                        }
                        continue;
                    }
                    Err(ContentError::Fatal(err)) => {
                        return Err(BackupError::Content {
                            path: path.into(),
                            source: err,
                        })
                    }
                    Err(ContentError::Short { actual }) => {
                        return Err(BackupError::ShortSource {
                            path: path.into(),
                            expected: meta.size,
                            actual,
                        })
                    }
                }
            };
            data_offset += written;
        }

        if is_new {
            nidx.add.push(rel_name);
        }
        nidx.contents.push(meta);
    }

    if incremental {
        // Renumber previous-references to the compacted list; references
        // nothing points at anymore are dropped.
        let mut remap: HashMap<usize, usize> = HashMap::new();
        for (i, earlier) in earliers.iter().enumerate() {
            if earlier.used {
                remap.insert(i, nidx.previous.len());
                nidx.previous.push(earlier.previous.clone());
            }
        }
        for file in nidx.contents.iter_mut() {
            if let Some(old) = file.previous_index {
                file.previous_index = Some(remap[&old]);
            }
        }

        nidx.delete = unseen.into_keys().collect();
        // sorted deletes compress better in the index stream
        nidx.delete.sort();
    }

    let counter = data.finish()?;
    nidx.data_size = counter.bytes_written();
    let mut raw = counter.into_inner();
    raw.complete()?;
    drop(raw);

    let index_object = snapshot.index_object();
    let tmp = format!("{}.tmp", index_object);
    let mut raw = store.create(&tmp)?;
    partials.register(&tmp);
    let index_size = index::write_index(&nidx, &mut raw, &settings.passphrase)?;
    raw.complete()?;
    drop(raw);

    // the rename publishes the snapshot; everything before it is partial
    store.rename(&tmp, &index_object)?;
    partials.clear();

    let summary = Summary {
        name,
        incremental,
        files: nidx.contents.len() as u64,
        logical_bytes: data_offset,
        stored_bytes: nidx.data_size + index_size,
        added: nidx.add.len(),
        deleted: nidx.delete.len(),
        failed,
    };

    info!("new {} backup: {}", snapshot.kind(), summary.name);
    let add_del = if incremental {
        format!(", +{} files, -{} files", summary.added, summary.deleted)
    } else {
        String::new()
    };
    info!(
        "total files {}, total size {}, backup size {}{}",
        summary.files,
        format::size(summary.logical_bytes),
        format::size(summary.stored_bytes),
        add_del
    );

    if failed {
        warn!("backup was written, but not all files could be backed up; not cleaning up old backups");
    } else if options.dryrun {
        info!("dryrun, nothing was actually written");
    } else {
        crate::retention::prune(store.as_ref(), &settings, options.verbose)?;
    }

    Ok(summary)
}

fn match_path_for(rel: &str, is_dir: bool) -> String {
    // directories match with a trailing slash; the root is empty
    if is_dir && !rel.is_empty() {
        format!("{}/", rel)
    } else {
        rel.to_string()
    }
}

fn demotable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

struct PathFilter {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
    // matched directories; everything under them is kept
    whitelist: Vec<String>,
}

impl PathFilter {
    fn new(includes: Vec<Regex>, excludes: Vec<Regex>) -> PathFilter {
        PathFilter {
            includes,
            excludes,
            whitelist: Vec::new(),
        }
    }

    fn skip(&mut self, match_path: &str, is_dir: bool, verbose: bool) -> bool {
        if !self.includes.is_empty() {
            let matched = match_any(&self.includes, match_path);
            if matched && is_dir {
                self.whitelist.push(match_path.to_string());
            }
            if !matched && !is_dir {
                let keep = self
                    .whitelist
                    .iter()
                    .any(|white| match_path.starts_with(white.as_str()));
                if !keep {
                    if verbose {
                        println!("no include match, skipping {}", match_path);
                    }
                    return true;
                }
            }
        }
        if !self.excludes.is_empty() && match_any(&self.excludes, match_path) {
            if verbose {
                println!("exclude match, skipping {}", match_path);
            }
            return true;
        }
        false
    }

    fn keeps_dir(&self, match_path: &str) -> bool {
        self.includes.is_empty() || match_any(&self.includes, match_path)
    }
}

enum ContentError {
    Skip(io::Error),
    Fatal(io::Error),
    Short { actual: u64 },
}

fn store_file(path: &Path, size: u64, data: &mut impl Write) -> std::result::Result<u64, ContentError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if demotable(&err) => return Err(ContentError::Skip(err)),
        Err(err) => return Err(ContentError::Fatal(err)),
    };

    let mut taken = file.take(size);
    let copied = io::copy(&mut taken, data).map_err(ContentError::Fatal)?;
    if copied < size {
        return Err(ContentError::Short { actual: copied });
    }

    // the record keeps the stat'd size even if the file grew meanwhile
    let mut probe = [0u8; 1];
    if let Ok(n) = taken.into_inner().read(&mut probe) {
        if n > 0 {
            warn!(
                "storing {}: file grew while reading, truncating to {} bytes",
                path.display(),
                size
            );
        }
    }

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer::store::test::MemoryStore;
    use secrecy::Secret;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn settings() -> Settings {
        Settings {
            include: vec![],
            exclude: vec![],
            incrementals_per_full: 3,
            full_keep: 0,
            incremental_for_full_keep: 0,
            passphrase: Secret::new("backup test passphrase".to_string()),
        }
    }

    fn set_mtime(path: &Path, secs: i64) {
        use nix::sys::stat::{utimensat, UtimensatFlags};
        use nix::sys::time::{TimeSpec, TimeValLike};

        let ts = TimeSpec::seconds(secs);
        utimensat(None, path, &ts, &ts, UtimensatFlags::NoFollowSymlink).unwrap();
    }

    fn scenario_tree(root: &Path) {
        fs::write(root.join("a.txt"), b"hi").unwrap();
        fs::create_dir(root.join("dir")).unwrap();
        fs::write(root.join("dir/b.txt"), b"world").unwrap();
        symlink("a.txt", root.join("dir/s")).unwrap();
        set_mtime(&root.join("a.txt"), 1_700_000_000);
        set_mtime(&root.join("dir/b.txt"), 1_700_000_000);
        set_mtime(&root.join("dir"), 1_700_000_000);
    }

    async fn run(
        store: &Arc<dyn Store>,
        settings: &Settings,
        name: &str,
        dir: &Path,
    ) -> Summary {
        let options = Options {
            directory: Some(dir.into()),
            ..Options::default()
        };
        options
            .run(store.clone(), settings.clone(), name.to_string())
            .await
            .unwrap()
    }

    fn names(index: &Index) -> Vec<&str> {
        index.contents.iter().map(|f| f.name.as_str()).collect()
    }

    fn entry<'a>(index: &'a Index, name: &str) -> &'a FileMeta {
        index
            .contents
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no entry {name}"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn first_backup_is_full() {
        let tree = TempDir::new().unwrap();
        scenario_tree(tree.path());
        let memory = MemoryStore::default();
        let store: Arc<dyn Store> = Arc::new(memory.clone());
        let settings = settings();

        let summary = run(&store, &settings, "20240101-000000", tree.path()).await;
        assert!(!summary.incremental);
        assert!(!summary.failed);

        assert!(memory.contains("20240101-000000.data"));
        assert!(memory.contains("20240101-000000.index1.full"));
        assert!(!memory.contains("20240101-000000.index1.full.tmp"));

        let index = index::read_index(
            store.as_ref(),
            &Snapshot::full("20240101-000000"),
            &settings.passphrase,
        )
        .unwrap();

        assert_eq!(names(&index), vec![".", "a.txt", "dir", "dir/b.txt", "dir/s"]);
        assert!(index.previous.is_empty());
        assert!(index.add.is_empty());
        assert!(index.delete.is_empty());

        let a = entry(&index, "a.txt");
        assert_eq!((a.data_offset, a.size), (Some(0), 2));
        let b = entry(&index, "dir/b.txt");
        assert_eq!((b.data_offset, b.size), (Some(2), 5));
        let s = entry(&index, "dir/s");
        assert!(s.is_symlink);
        assert_eq!((s.data_offset, s.size), (Some(7), 5));
        let root = entry(&index, ".");
        assert!(root.is_dir);
        assert_eq!(root.data_offset, None);

        // the recorded size is the sealed size on the wire
        assert_eq!(
            index.data_size,
            memory.object("20240101-000000.data").unwrap().len() as u64
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unchanged_incremental_carries_everything() {
        let tree = TempDir::new().unwrap();
        scenario_tree(tree.path());
        let memory = MemoryStore::default();
        let store: Arc<dyn Store> = Arc::new(memory.clone());
        let settings = settings();

        run(&store, &settings, "20240101-000000", tree.path()).await;
        let summary = run(&store, &settings, "20240101-010000", tree.path()).await;
        assert!(summary.incremental);
        assert_eq!(summary.logical_bytes, 0);

        assert!(memory.contains("20240101-010000.index1.incr"));
        let index = index::read_index(
            store.as_ref(),
            &Snapshot::incremental("20240101-010000"),
            &settings.passphrase,
        )
        .unwrap();

        assert!(index.add.is_empty());
        assert!(index.delete.is_empty());
        assert_eq!(index.previous.len(), 1);
        assert_eq!(index.previous[0].name, "20240101-000000");
        assert!(index.previous[0].terminal);

        for file in index.contents.iter().filter(|f| !f.is_dir) {
            assert_eq!(file.previous_index, Some(0), "{}", file.name);
        }
        // offsets still point into the full backup's blob
        assert_eq!(entry(&index, "a.txt").data_offset, Some(0));
        assert_eq!(entry(&index, "dir/b.txt").data_offset, Some(2));
        assert_eq!(entry(&index, "dir/s").data_offset, Some(7));

        // the new blob only holds the sealed empty stream
        let empty_blob = memory.object("20240101-010000.data").unwrap();
        assert!(empty_blob.len() < 100);
        assert_eq!(index.data_size, empty_blob.len() as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn add_delete_modify_incremental() {
        let tree = TempDir::new().unwrap();
        scenario_tree(tree.path());
        let memory = MemoryStore::default();
        let store: Arc<dyn Store> = Arc::new(memory.clone());
        let settings = settings();

        run(&store, &settings, "20240101-000000", tree.path()).await;

        fs::remove_file(tree.path().join("a.txt")).unwrap();
        fs::write(tree.path().join("c.txt"), b"!").unwrap();
        fs::write(tree.path().join("dir/b.txt"), b"WORLD").unwrap();
        set_mtime(&tree.path().join("c.txt"), 1_700_000_100);
        set_mtime(&tree.path().join("dir/b.txt"), 1_700_000_100);
        set_mtime(&tree.path().join("dir"), 1_700_000_000);

        let summary = run(&store, &settings, "20240101-010000", tree.path()).await;
        assert!(summary.incremental);

        let index = index::read_index(
            store.as_ref(),
            &Snapshot::incremental("20240101-010000"),
            &settings.passphrase,
        )
        .unwrap();

        assert_eq!(index.add, vec!["c.txt"]);
        assert_eq!(index.delete, vec!["a.txt"]);
        assert_eq!(names(&index), vec![".", "c.txt", "dir", "dir/b.txt", "dir/s"]);

        // rewritten and new bodies land in this blob, in walk order
        let c = entry(&index, "c.txt");
        assert_eq!((c.data_offset, c.size, c.previous_index), (Some(0), 1, None));
        let b = entry(&index, "dir/b.txt");
        assert_eq!((b.data_offset, b.size, b.previous_index), (Some(1), 5, None));

        // the untouched symlink still lives in the full backup
        let s = entry(&index, "dir/s");
        assert_eq!(s.previous_index, Some(0));
        assert_eq!(index.previous.len(), 1);
        assert_eq!(index.previous[0].name, "20240101-000000");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn chain_rolls_over_to_full() {
        let tree = TempDir::new().unwrap();
        scenario_tree(tree.path());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let mut settings = settings();
        settings.incrementals_per_full = 2;

        run(&store, &settings, "20240101-000000", tree.path()).await;
        run(&store, &settings, "20240101-010000", tree.path()).await;
        run(&store, &settings, "20240101-020000", tree.path()).await;
        let rollover = run(&store, &settings, "20240101-030000", tree.path()).await;
        assert!(!rollover.incremental);

        let listed = snapshots::list(store.as_ref()).unwrap();
        assert_eq!(
            listed.iter().map(|s| s.incremental).collect::<Vec<_>>(),
            vec![false, true, true, false]
        );

        let index = index::read_index(
            store.as_ref(),
            &Snapshot::full("20240101-030000"),
            &settings.passphrase,
        )
        .unwrap();
        assert!(index.previous.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn include_and_exclude_filter_the_walk() {
        let tree = TempDir::new().unwrap();
        fs::create_dir(tree.path().join("dir")).unwrap();
        fs::write(tree.path().join("dir/keep.tmp"), b"scratch").unwrap();
        fs::write(tree.path().join("dir/keep.txt"), b"kept").unwrap();
        fs::create_dir(tree.path().join("other")).unwrap();
        fs::write(tree.path().join("other/x"), b"skipped").unwrap();

        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let mut settings = settings();
        settings.include = vec!["^dir/".into()];
        settings.exclude = vec!["\\.tmp$".into()];

        run(&store, &settings, "20240101-000000", tree.path()).await;

        let index = index::read_index(
            store.as_ref(),
            &Snapshot::full("20240101-000000"),
            &settings.passphrase,
        )
        .unwrap();
        assert_eq!(names(&index), vec!["dir", "dir/keep.txt"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn filters_are_idempotent() {
        let tree = TempDir::new().unwrap();
        fs::create_dir(tree.path().join("dir")).unwrap();
        fs::write(tree.path().join("dir/keep.txt"), b"kept").unwrap();
        fs::write(tree.path().join("stray"), b"stray").unwrap();
        set_mtime(&tree.path().join("dir/keep.txt"), 1_700_000_000);
        set_mtime(&tree.path().join("dir"), 1_700_000_000);

        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let mut settings = settings();
        settings.include = vec!["^dir/".into()];

        run(&store, &settings, "20240101-000000", tree.path()).await;
        run(&store, &settings, "20240101-010000", tree.path()).await;

        let first = index::read_index(
            store.as_ref(),
            &Snapshot::full("20240101-000000"),
            &settings.passphrase,
        )
        .unwrap();
        let second = index::read_index(
            store.as_ref(),
            &Snapshot::incremental("20240101-010000"),
            &settings.passphrase,
        )
        .unwrap();

        assert_eq!(names(&first), names(&second));
        assert!(second.add.is_empty());
        assert!(second.delete.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dryrun_writes_nothing() {
        let tree = TempDir::new().unwrap();
        scenario_tree(tree.path());
        let memory = MemoryStore::default();
        let store: Arc<dyn Store> = Arc::new(memory.clone());
        let settings = settings();

        let options = Options {
            dryrun: true,
            directory: Some(tree.path().into()),
            ..Options::default()
        };
        let summary = options
            .run(store.clone(), settings.clone(), "20240101-000000".into())
            .await
            .unwrap();

        assert!(!summary.incremental);
        assert_eq!(summary.files, 5);
        assert!(memory.list().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn config_file_is_never_backed_up() {
        let tree = TempDir::new().unwrap();
        scenario_tree(tree.path());
        fs::write(tree.path().join(CONFIG_FILE), b"passphrase = \"x\"").unwrap();
        fs::write(
            tree.path().join("dir").join(CONFIG_FILE),
            b"passphrase = \"x\"",
        )
        .unwrap();

        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let settings = settings();
        run(&store, &settings, "20240101-000000", tree.path()).await;

        let index = index::read_index(
            store.as_ref(),
            &Snapshot::full("20240101-000000"),
            &settings.passphrase,
        )
        .unwrap();
        assert!(!names(&index).iter().any(|n| n.contains(CONFIG_FILE)));
    }
}
