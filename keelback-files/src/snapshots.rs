//! Snapshot naming, listing, and chain resolution.
//!
//! A snapshot is the pair `<name>.data` + `<name>.index1.{full,incr}`.
//! Names are UTC timestamps, so the store's ascending listing is also
//! chronological.

use crate::index::{self, IndexError};

use chrono::{DateTime, Utc};
use coffer::store::{Store, StoreError};
use secrecy::SecretString;
use thiserror::Error;

pub const INDEX_INFIX: &str = ".index1.";
pub const FULL_EXT: &str = "full";
pub const INCR_EXT: &str = "incr";

/// The selector that resolves to the newest snapshot.
pub const LATEST: &str = "latest";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub incremental: bool,
}

impl Snapshot {
    pub fn full(name: impl Into<String>) -> Snapshot {
        Snapshot {
            name: name.into(),
            incremental: false,
        }
    }

    pub fn incremental(name: impl Into<String>) -> Snapshot {
        Snapshot {
            name: name.into(),
            incremental: true,
        }
    }

    pub fn data_object(&self) -> String {
        format!("{}.data", self.name)
    }

    pub fn index_object(&self) -> String {
        format!("{}{}{}", self.name, INDEX_INFIX, self.ext())
    }

    pub fn ext(&self) -> &'static str {
        if self.incremental {
            INCR_EXT
        } else {
            FULL_EXT
        }
    }

    pub fn kind(&self) -> &'static str {
        if self.incremental {
            "incremental"
        } else {
            "full"
        }
    }
}

/// Snapshot names derive from their creation time; lexicographic order is
/// chronological order.
pub fn new_name(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("no backup found")]
    NotFound,
    #[error("chain references missing snapshot {name}")]
    Broken { name: String },
    #[error("store error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
    #[error("index error: {source}")]
    Index {
        #[from]
        source: IndexError,
    },
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// All snapshots on the store, ascending by name. Data blobs, transient
/// `.tmp` objects and unrelated names are ignored.
pub fn list(store: &dyn Store) -> std::result::Result<Vec<Snapshot>, StoreError> {
    let mut snapshots = Vec::new();
    for name in store.list()? {
        if let Some((base, ext)) = name.split_once(INDEX_INFIX) {
            match ext {
                FULL_EXT => snapshots.push(Snapshot::full(base)),
                INCR_EXT => snapshots.push(Snapshot::incremental(base)),
                _ => {}
            }
        }
    }
    snapshots.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(snapshots)
}

/// Resolve a selector (`latest` or an exact name) against the store.
pub fn find(store: &dyn Store, selector: &str) -> Result<Snapshot> {
    let all = list(store)?;
    resolve(&all, selector)
}

/// Decide whether the next backup extends the latest run of incrementals.
///
/// Returns the snapshot to build on when the listing ends in fewer than
/// `window` incrementals on top of a full; `None` means the next backup
/// must be full. The listing is authoritative here: data references skip
/// snapshots nothing was carried from, so they cannot count the run.
pub fn extend_target(all: &[Snapshot], window: u32) -> Option<&Snapshot> {
    let latest = all.last()?;
    let trailing = all.iter().rev().take_while(|s| s.incremental).count();
    if trailing >= all.len() {
        // no full underneath; start over
        return None;
    }
    if trailing < window as usize {
        Some(latest)
    } else {
        None
    }
}

fn resolve(all: &[Snapshot], selector: &str) -> Result<Snapshot> {
    if selector == LATEST {
        return all.last().cloned().ok_or(ChainError::NotFound);
    }
    all.iter()
        .find(|snapshot| snapshot.name == selector)
        .cloned()
        .ok_or(ChainError::NotFound)
}

/// Resolve a selector to the chain of snapshots it depends on: the
/// snapshot itself first, then every snapshot reached by following the
/// last previous-reference, ending at a full backup.
pub fn find_chain(
    store: &dyn Store,
    passphrase: &SecretString,
    selector: &str,
) -> Result<Vec<Snapshot>> {
    let all = list(store)?;
    let head = resolve(&all, selector)?;

    let mut chain = vec![head.clone()];
    let mut current = head;
    while current.incremental {
        // a cycle can only come from a corrupt store
        if chain.len() > all.len() {
            return Err(ChainError::Broken { name: current.name });
        }

        let index = index::read_index(store, &current, passphrase)?;
        let last = match index.previous.last() {
            Some(last) => last.name.clone(),
            // every file was rewritten; the snapshot stands on its own
            None => break,
        };

        let next = all
            .iter()
            .find(|snapshot| snapshot.name == last)
            .cloned()
            .ok_or(ChainError::Broken { name: last })?;
        chain.push(next.clone());
        current = next;
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Index, SnapshotRef};
    use chrono::TimeZone;
    use coffer::store::test::MemoryStore;
    use secrecy::Secret;

    fn passphrase() -> SecretString {
        Secret::new("chain test passphrase".to_string())
    }

    fn put_index(store: &MemoryStore, snapshot: &Snapshot, index: &Index) {
        use coffer::store::Store;
        let mut object = store.create(&snapshot.index_object()).unwrap();
        crate::index::write_index(index, &mut object, &passphrase()).unwrap();
        object.complete().unwrap();
    }

    #[test]
    fn names_sort_chronologically() {
        let older = new_name(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let newer = new_name(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        assert_eq!(older, "20240101-000000");
        assert!(older < newer);
    }

    #[test]
    fn listing_skips_unrelated_objects() {
        let store = MemoryStore::default();
        for name in [
            "20240101-000000.data",
            "20240101-000000.index1.full",
            "20240101-010000.data",
            "20240101-010000.index1.incr",
            "20240101-020000.index1.incr.tmp",
            "stray-object",
        ] {
            use coffer::store::Store;
            let mut object = store.create(name).unwrap();
            object.complete().unwrap();
        }

        let snapshots = list(&store).unwrap();
        assert_eq!(
            snapshots,
            vec![
                Snapshot::full("20240101-000000"),
                Snapshot::incremental("20240101-010000"),
            ]
        );
    }

    #[test]
    fn latest_resolves_to_newest() {
        let store = MemoryStore::default();
        put_index(&store, &Snapshot::full("20240101-000000"), &Index::default());
        put_index(&store, &Snapshot::full("20240102-000000"), &Index::default());

        assert_eq!(
            find(&store, LATEST).unwrap().name,
            "20240102-000000".to_string()
        );
        assert_eq!(
            find(&store, "20240101-000000").unwrap().name,
            "20240101-000000".to_string()
        );
        assert!(matches!(
            find(&store, "20230101-000000"),
            Err(ChainError::NotFound)
        ));
    }

    #[test]
    fn chain_walks_to_the_full() {
        let store = MemoryStore::default();
        let full = Snapshot::full("20240101-000000");
        let incr1 = Snapshot::incremental("20240101-010000");
        let incr2 = Snapshot::incremental("20240101-020000");

        put_index(&store, &full, &Index::default());
        put_index(
            &store,
            &incr1,
            &Index {
                previous: vec![SnapshotRef {
                    terminal: true,
                    name: full.name.clone(),
                    data_size: 10,
                }],
                ..Index::default()
            },
        );
        put_index(
            &store,
            &incr2,
            &Index {
                previous: vec![
                    SnapshotRef {
                        terminal: true,
                        name: full.name.clone(),
                        data_size: 10,
                    },
                    SnapshotRef {
                        terminal: true,
                        name: incr1.name.clone(),
                        data_size: 20,
                    },
                ],
                ..Index::default()
            },
        );

        let chain = find_chain(&store, &passphrase(), LATEST).unwrap();
        assert_eq!(
            chain.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["20240101-020000", "20240101-010000", "20240101-000000"]
        );
    }

    #[test]
    fn chain_of_a_full_is_itself() {
        let store = MemoryStore::default();
        put_index(&store, &Snapshot::full("20240101-000000"), &Index::default());

        let chain = find_chain(&store, &passphrase(), LATEST).unwrap();
        assert_eq!(chain, vec![Snapshot::full("20240101-000000")]);
    }

    #[test]
    fn missing_link_breaks_the_chain() {
        let store = MemoryStore::default();
        let incr = Snapshot::incremental("20240101-010000");
        put_index(
            &store,
            &incr,
            &Index {
                previous: vec![SnapshotRef {
                    terminal: true,
                    name: "20240101-000000".into(),
                    data_size: 10,
                }],
                ..Index::default()
            },
        );

        assert!(matches!(
            find_chain(&store, &passphrase(), LATEST),
            Err(ChainError::Broken { name }) if name == "20240101-000000"
        ));
    }

    #[test]
    fn extension_window_counts_trailing_incrementals() {
        let full = Snapshot::full("20240101-000000");
        let incr1 = Snapshot::incremental("20240101-010000");
        let incr2 = Snapshot::incremental("20240101-020000");

        assert_eq!(extend_target(&[], 2), None);
        assert_eq!(
            extend_target(&[full.clone()], 2).map(|s| s.name.as_str()),
            Some("20240101-000000")
        );
        assert_eq!(
            extend_target(&[full.clone(), incr1.clone()], 2).map(|s| s.name.as_str()),
            Some("20240101-010000")
        );
        // window is used up
        assert_eq!(extend_target(&[full.clone(), incr1.clone(), incr2.clone()], 2), None);
        // an orphan run with no full underneath starts over
        assert_eq!(extend_target(&[incr1, incr2], 5), None);
        // window 0 is handled by the caller, but stays sane here
        assert_eq!(extend_target(&[full], 0), None);
    }

    #[test]
    fn empty_store_has_no_backups() {
        let store = MemoryStore::default();
        assert!(matches!(
            find_chain(&store, &passphrase(), LATEST),
            Err(ChainError::NotFound)
        ));
    }
}
