//! All-or-nothing transactions for the in-memory store.
//!
//! Inserts are staged locally and applied under the store's write lock at
//! commit time, so readers see either every staged document or none.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use time::OffsetDateTime;

use grantstore_storage::{CollectionRef, Document, DocumentTransaction, StorageError};

use crate::storage::{Inner, slot_free};

/// A staged set of inserts against an [`InMemoryStore`](crate::InMemoryStore).
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    staged: Vec<(CollectionRef, Document)>,
    finished: bool,
}

impl MemoryTransaction {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            staged: Vec::new(),
            finished: false,
        }
    }

    /// Number of staged inserts.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn abort(&mut self) {
        self.finished = true;
        self.staged.clear();
        self.inner.counters.aborted.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl DocumentTransaction for MemoryTransaction {
    async fn insert(
        &mut self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<(), StorageError> {
        if self.finished {
            return Err(StorageError::transaction_error(
                "Transaction already completed (committed or rolled back)",
            ));
        }

        let staged_dup = self
            .staged
            .iter()
            .any(|(c, d)| c == collection && d.id == document.id);
        let committed_dup = {
            let guard = self.inner.collections.read().await;
            !slot_free(guard.get(collection), &document.id, OffsetDateTime::now_utc())
        };
        if staged_dup || committed_dup {
            let err = StorageError::already_exists(collection.qualified(), &document.id);
            self.abort();
            return Err(err);
        }

        self.staged.push((collection.clone(), document));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if self.finished {
            return Err(StorageError::transaction_error(
                "Transaction already completed (committed or rolled back)",
            ));
        }

        let now = OffsetDateTime::now_utc();
        let mut guard = self.inner.collections.write().await;

        // Re-check every assertion under the write lock: another writer may
        // have committed the same key since it was staged.
        let conflict = {
            let mut seen = HashSet::new();
            self.staged
                .iter()
                .find(|(collection, document)| {
                    !seen.insert((collection.clone(), document.id.clone()))
                        || !slot_free(guard.get(collection), &document.id, now)
                })
                .map(|(collection, document)| {
                    StorageError::already_exists(collection.qualified(), &document.id)
                })
        };
        if let Some(err) = conflict {
            drop(guard);
            self.abort();
            return Err(err);
        }

        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();
        for (collection, document) in staged {
            guard
                .entry(collection)
                .or_default()
                .insert(document.id.clone(), document);
        }
        drop(guard);

        self.finished = true;
        self.inner.counters.committed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(documents = count, "Transaction committed successfully");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        if !self.finished {
            self.abort();
            tracing::debug!("Transaction rolled back successfully");
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                staged = self.staged_len(),
                "MemoryTransaction dropped without explicit commit/rollback - discarding"
            );
            self.abort();
        }
    }
}
