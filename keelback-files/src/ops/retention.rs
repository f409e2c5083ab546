//! Age-based pruning, run after a clean backup: keep the configured
//! number of fulls, drop everything older, then drop incrementals that
//! fall outside their own, smaller window.

use crate::{settings::Settings, snapshots, snapshots::Snapshot};

use coffer::store::{Store, StoreError};
use tracing::{error, info};

/// Deletion problems are logged and do not abort; the listing itself
/// failing does.
pub fn prune(
    store: &dyn Store,
    settings: &Settings,
    verbose: bool,
) -> Result<(), StoreError> {
    if settings.full_keep == 0 && settings.incremental_for_full_keep == 0 {
        return Ok(());
    }

    let mut backups = snapshots::list(store)?;

    // everything older than the oldest retained full goes, incrementals
    // included
    if settings.full_keep > 0 {
        let mut fulls_seen = 0;
        for i in (1..backups.len()).rev() {
            if backups[i].incremental {
                continue;
            }
            fulls_seen += 1;
            if fulls_seen < settings.full_keep {
                continue;
            }
            for old in &backups[..i] {
                delete_snapshot(store, old, verbose);
            }
            backups.drain(..i);
            break;
        }
    }

    // within the retained window, incrementals older than the cutoff full
    // go too; their fulls stay
    let mut fulls_seen = 0;
    for i in (1..backups.len()).rev() {
        if backups[i].incremental {
            continue;
        }
        fulls_seen += 1;
        if fulls_seen < settings.incremental_for_full_keep {
            continue;
        }
        for old in backups[..i].iter().filter(|b| b.incremental) {
            delete_snapshot(store, old, verbose);
        }
        break;
    }

    Ok(())
}

fn delete_snapshot(store: &dyn Store, snapshot: &Snapshot, verbose: bool) {
    if verbose {
        info!("cleaning up old {} backup {}", snapshot.kind(), snapshot.name);
    }
    if let Err(err) = store.delete(&snapshot.data_object()) {
        error!("removing old backup: {}", err);
    }
    if let Err(err) = store.delete(&snapshot.index_object()) {
        error!("removing old backup: {}", err);
    }
}
