//! Background deletion of expired records.
//!
//! Backends already hide expired documents from reads; the reaper is what
//! removes them. It runs on a short fixed interval and never stops on a
//! failed pass.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use grantstore_storage::{CollectionRef, DynDocumentStore, StorageError};

use crate::config::TokenCollections;

/// Default reaper poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Prepares collections for expiry and reaps them.
#[derive(Clone)]
pub struct ExpiryEnforcer {
    store: DynDocumentStore,
    collections: Vec<CollectionRef>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ExpiryEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryEnforcer")
            .field("backend", &self.store.backend_name())
            .field("collections", &self.collections)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ExpiryEnforcer {
    /// Creates an enforcer over arbitrary collections.
    pub fn new(
        store: DynDocumentStore,
        collections: impl IntoIterator<Item = CollectionRef>,
    ) -> Self {
        Self {
            store,
            collections: collections.into_iter().collect(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Creates an enforcer over every collection of a token store,
    /// including the transaction journal.
    pub fn for_tokens(store: DynDocumentStore, collections: &TokenCollections) -> Self {
        Self::new(store, collections.iter().cloned())
    }

    /// Sets the reaper poll interval. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn collections(&self) -> &[CollectionRef] {
        &self.collections
    }

    /// Creates each collection and its expiry index if missing.
    ///
    /// Safe to call on every startup.
    ///
    /// # Errors
    ///
    /// Returns the first backend error; collections before it stay prepared.
    pub async fn configure(&self) -> Result<(), StorageError> {
        for collection in &self.collections {
            self.store.ensure_collection(collection).await?;
            debug!(collection = %collection, "Collection ready for expiry");
        }
        info!(
            collections = self.collections.len(),
            backend = self.store.backend_name(),
            "Expiry configured"
        );
        Ok(())
    }

    /// Deletes everything that has expired by now, in every collection.
    ///
    /// A failing collection does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns the first error seen after all collections were attempted.
    pub async fn reap_once(&self) -> Result<u64, StorageError> {
        let now = OffsetDateTime::now_utc();
        let mut total = 0;
        let mut first_error = None;

        for collection in &self.collections {
            match self.store.delete_expired(collection, now).await {
                Ok(removed) => total += removed,
                Err(e) => {
                    warn!(collection = %collection, error = %e, "Reaping collection failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Spawns the reaper loop. The loop runs until the returned handle is
    /// stopped or dropped.
    pub fn start(self) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(?poll_interval, "Expiry reaper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                match self.reap_once().await {
                    Ok(removed) if removed > 0 => debug!(removed, "Reaped expired records"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Reaper pass failed; retrying next tick"),
                }
            }
            info!("Expiry reaper stopped");
        });

        ReaperHandle {
            stop_tx,
            task: Some(task),
        }
    }
}

/// Handle to a running reaper. Dropping it aborts the task.
#[derive(Debug)]
pub struct ReaperHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Asks the reaper to stop and waits for the current pass to finish.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "Expiry reaper task panicked");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
