use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use grantstore_storage::{
    CollectionRef, Document, DocumentStore, DocumentTransaction, FieldFilter, StorageError,
};

use crate::transaction::MemoryTransaction;

pub(crate) type Collection = HashMap<String, Document>;
pub(crate) type Collections = HashMap<CollectionRef, Collection>;

/// Returns `true` if `id` can be inserted into `collection` at `now`.
///
/// An expired document that the reaper has not removed yet does not block
/// a new insert.
pub(crate) fn slot_free(collection: Option<&Collection>, id: &str, now: OffsetDateTime) -> bool {
    collection
        .and_then(|c| c.get(id))
        .is_none_or(|doc| doc.is_expired_at(now))
}

/// Counters describing what the store has done since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Committed transactions.
    pub committed: u64,
    /// Transactions rolled back explicitly, dropped, or aborted by a failed assertion.
    pub aborted: u64,
    /// Documents removed by `delete_expired`.
    pub reaped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) committed: AtomicU64,
    pub(crate) aborted: AtomicU64,
    pub(crate) reaped: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) collections: RwLock<Collections>,
    pub(crate) counters: Counters,
    transactions: bool,
}

/// In-memory document store.
///
/// This storage implementation provides:
/// - Per-collection maps guarded by one `RwLock`
/// - All-or-nothing multi-document transactions (optional)
/// - Read-time expiry filtering plus explicit reaping
///
/// Cloning is cheap; clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    pub(crate) inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new in-memory store with transaction support.
    #[must_use]
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Creates a store that reports no transaction support.
    ///
    /// Writers fall back to sequential inserts with compensation, which is
    /// useful for exercising that path.
    #[must_use]
    pub fn without_transactions() -> Self {
        Self::build(false)
    }

    fn build(transactions: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(HashMap::new()),
                counters: Counters::default(),
                transactions,
            }),
        }
    }

    /// Number of documents in a collection, including expired ones not yet reaped.
    pub async fn len(&self, collection: &CollectionRef) -> usize {
        let guard = self.inner.collections.read().await;
        guard.get(collection).map_or(0, HashMap::len)
    }

    /// Returns `true` if the collection holds no documents.
    pub async fn is_empty(&self, collection: &CollectionRef) -> bool {
        self.len(collection).await == 0
    }

    /// Returns whether `ensure_collection` (or an insert) created the collection.
    pub async fn has_collection(&self, collection: &CollectionRef) -> bool {
        self.inner.collections.read().await.contains_key(collection)
    }

    /// Returns a snapshot of the store counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let c = &self.inner.counters;
        StoreStats {
            committed: c.committed.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            reaped: c.reaped.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ensure_collection(&self, collection: &CollectionRef) -> Result<(), StorageError> {
        let mut guard = self.inner.collections.write().await;
        guard.entry(collection.clone()).or_default();
        Ok(())
    }

    #[instrument(skip(self), fields(collection = %collection))]
    async fn delete_expired(
        &self,
        collection: &CollectionRef,
        now: OffsetDateTime,
    ) -> Result<u64, StorageError> {
        let mut guard = self.inner.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, doc| !doc.is_expired_at(now));
        let removed = (before - docs.len()) as u64;
        if removed > 0 {
            self.inner
                .counters
                .reaped
                .fetch_add(removed, Ordering::Relaxed);
            debug!(removed, "Reaped expired documents");
        }
        Ok(removed)
    }

    async fn insert(
        &self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<(), StorageError> {
        let now = OffsetDateTime::now_utc();
        let mut guard = self.inner.collections.write().await;
        if !slot_free(guard.get(collection), &document.id, now) {
            return Err(StorageError::already_exists(
                collection.qualified(),
                document.id,
            ));
        }
        guard
            .entry(collection.clone())
            .or_default()
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn replace(
        &self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<bool, StorageError> {
        let now = OffsetDateTime::now_utc();
        let mut guard = self.inner.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(false);
        };
        match docs.get_mut(&document.id) {
            Some(existing) if !existing.is_expired_at(now) => {
                *existing = document;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_id(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> Result<Option<Document>, StorageError> {
        let now = OffsetDateTime::now_utc();
        let guard = self.inner.collections.read().await;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.get(id))
            .filter(|doc| !doc.is_expired_at(now))
            .cloned())
    }

    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &FieldFilter,
    ) -> Result<Option<Document>, StorageError> {
        let now = OffsetDateTime::now_utc();
        let guard = self.inner.collections.read().await;
        let Some(docs) = guard.get(collection) else {
            return Ok(None);
        };
        Ok(docs
            .values()
            .filter(|doc| !doc.is_expired_at(now))
            .find(|doc| doc.body.as_object().is_some_and(|body| filter.matches(body)))
            .cloned())
    }

    async fn delete_by_id(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> Result<bool, StorageError> {
        let mut guard = self.inner.collections.write().await;
        Ok(guard
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DocumentTransaction>, StorageError> {
        if !self.inner.transactions {
            return Err(StorageError::transaction_error(
                "transactions are disabled for this in-memory store",
            ));
        }
        Ok(Box::new(MemoryTransaction::new(Arc::clone(&self.inner))))
    }

    fn supports_transactions(&self) -> bool {
        self.inner.transactions
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::Duration;

    fn collection(name: &str) -> CollectionRef {
        CollectionRef::new("oauth2", name).unwrap()
    }

    #[tokio::test]
    async fn test_store_basic_operations() {
        let store = InMemoryStore::new();
        let clients = collection("client");

        store
            .insert(&clients, Document::new("app", json!({"secret": "s"})))
            .await
            .unwrap();
        assert_eq!(store.len(&clients).await, 1);

        let found = store.find_by_id(&clients, "app").await.unwrap().unwrap();
        assert_eq!(found.field_str("secret"), Some("s"));

        let replaced = store
            .replace(&clients, Document::new("app", json!({"secret": "t"})))
            .await
            .unwrap();
        assert!(replaced);
        let found = store.find_by_id(&clients, "app").await.unwrap().unwrap();
        assert_eq!(found.field_str("secret"), Some("t"));

        assert!(store.delete_by_id(&clients, "app").await.unwrap());
        assert!(store.is_empty(&clients).await);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = InMemoryStore::new();
        let c = collection("oauth2_access");

        store
            .insert(&c, Document::new("AT1", json!({"basic_id": "b1"})))
            .await
            .unwrap();
        let err = store
            .insert(&c, Document::new("AT1", json!({"basic_id": "b2"})))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        let kept = store.find_by_id(&c, "AT1").await.unwrap().unwrap();
        assert_eq!(kept.field_str("basic_id"), Some("b1"));
    }

    #[tokio::test]
    async fn test_missing_documents() {
        let store = InMemoryStore::new();
        let c = collection("oauth2_basic");

        assert!(store.find_by_id(&c, "nope").await.unwrap().is_none());
        assert!(!store.delete_by_id(&c, "nope").await.unwrap());
        assert!(!store.delete_by_id(&c, "nope").await.unwrap());
        assert!(
            !store
                .replace(&c, Document::new("nope", json!({})))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_expired_documents_are_invisible_and_reaped() {
        let store = InMemoryStore::new();
        let c = collection("oauth2_basic");
        let now = OffsetDateTime::now_utc();

        store
            .insert(
                &c,
                Document::new("old", json!({})).with_expiry(now - Duration::seconds(1)),
            )
            .await
            .unwrap();
        store
            .insert(
                &c,
                Document::new("new", json!({})).with_expiry(now + Duration::hours(1)),
            )
            .await
            .unwrap();

        assert!(store.find_by_id(&c, "old").await.unwrap().is_none());
        assert!(store.find_by_id(&c, "new").await.unwrap().is_some());
        assert_eq!(store.len(&c).await, 2);

        let removed = store.delete_expired(&c, now).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(&c).await, 1);
        assert_eq!(store.stats().reaped, 1);
    }

    #[tokio::test]
    async fn test_expired_document_does_not_block_insert() {
        let store = InMemoryStore::new();
        let c = collection("oauth2_access");
        let now = OffsetDateTime::now_utc();

        store
            .insert(
                &c,
                Document::new("AT1", json!({"basic_id": "stale"}))
                    .with_expiry(now - Duration::seconds(5)),
            )
            .await
            .unwrap();
        store
            .insert(&c, Document::new("AT1", json!({"basic_id": "fresh"})))
            .await
            .unwrap();

        let doc = store.find_by_id(&c, "AT1").await.unwrap().unwrap();
        assert_eq!(doc.field_str("basic_id"), Some("fresh"));
    }

    #[tokio::test]
    async fn test_find_one_by_fields() {
        let store = InMemoryStore::new();
        let c = collection("oauth2_refresh");

        store
            .insert(
                &c,
                Document::new("RT1", json!({"user_id": "u1", "client_id": "c1"})),
            )
            .await
            .unwrap();
        store
            .insert(
                &c,
                Document::new("RT2", json!({"user_id": "u2", "client_id": "c1"})),
            )
            .await
            .unwrap();

        let filter = FieldFilter::new().eq("user_id", "u2").eq("client_id", "c1");
        let found = store.find_one(&c, &filter).await.unwrap().unwrap();
        assert_eq!(found.id, "RT2");

        let filter = FieldFilter::new().eq("user_id", "u3");
        assert!(store.find_one(&c, &filter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let store = InMemoryStore::new();
        let c = collection("oauth2_txn");

        assert!(!store.has_collection(&c).await);
        store.ensure_collection(&c).await.unwrap();
        store.ensure_collection(&c).await.unwrap();
        assert!(store.has_collection(&c).await);
        assert!(store.is_empty(&c).await);
    }

    #[tokio::test]
    async fn test_transactions_can_be_disabled() {
        let store = InMemoryStore::without_transactions();
        assert!(!store.supports_transactions());
        assert!(store.begin_transaction().await.is_err());
        assert_eq!(store.backend_name(), "memory");
    }
}
