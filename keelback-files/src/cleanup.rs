//! Interrupt handling for in-flight backups.
//!
//! The engine publishes the names of objects it has created but not yet
//! published; a background task owns that list and, on SIGINT/SIGTERM,
//! deletes them all in parallel before exiting non-zero. A second signal
//! during cleanup aborts immediately.

use coffer::store::Store;

use futures::future::join_all;
use tokio::{
    signal::unix::{signal, SignalKind},
    task,
};
use tracing::{error, info};

use std::{process, sync::Arc};

/// Handle for publishing partial object names to the interrupt task.
#[derive(Clone)]
pub struct PartialObjects {
    names: flume::Sender<String>,
}

impl PartialObjects {
    /// Track an object so it is removed if the run is interrupted.
    pub fn register(&self, name: impl Into<String>) {
        let _ = self.names.send(name.into());
    }

    /// Forget all tracked objects; the run has been committed.
    pub fn clear(&self) {
        let _ = self.names.send(String::new());
    }
}

/// Spawn the interrupt task for one engine run. The returned handle feeds
/// it; dropping every handle ends the task quietly.
pub fn watch(store: Arc<dyn Store>) -> PartialObjects {
    let (tx, rx) = flume::unbounded::<String>();

    tokio::spawn(async move {
        let mut interrupt = signal(SignalKind::interrupt()).expect("signal handler");
        let mut terminate = signal(SignalKind::terminate()).expect("signal handler");
        let mut names: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                msg = rx.recv_async() => match msg {
                    Ok(name) if name.is_empty() => names.clear(),
                    Ok(name) => names.push(name),
                    Err(_) => return,
                },
                _ = interrupt.recv() => break,
                _ = terminate.recv() => break,
            }
        }

        let deletes = join_all(names.into_iter().map(|name| {
            let store = store.clone();
            task::spawn_blocking(move || {
                info!("cleaning up partial object {}", name);
                if let Err(err) = store.delete(&name) {
                    error!("failed to clean up {}: {}", name, err);
                }
            })
        }));

        tokio::select! {
            _ = deletes => {}
            _ = interrupt.recv() => error!("signal while cleaning up, quitting"),
            _ = terminate.recv() => error!("signal while cleaning up, quitting"),
        }

        process::exit(1);
    });

    PartialObjects { names: tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer::store::test::MemoryStore;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tracking_survives_resets() {
        let store = Arc::new(MemoryStore::default());
        let partials = watch(store);

        partials.register("20240101-000000.data");
        partials.register("20240101-000000.index1.full.tmp");
        partials.clear();
        // the task drains the channel and exits once the handle is gone
        drop(partials);
    }
}
