//! Storage traits for the document storage abstraction layer.
//!
//! This module defines the core traits that all storage backends must implement.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::types::{CollectionRef, Document, FieldFilter};

/// The main storage trait that all document backends must implement.
///
/// Implementations must be thread-safe (`Send + Sync`). Reads never return a
/// document whose `expires_at` has passed, even if the reaper has not yet
/// deleted it.
///
/// # Example
///
/// ```ignore
/// use grantstore_storage::{CollectionRef, DocumentStore, StorageError};
///
/// async fn load(store: &dyn DocumentStore, id: &str) -> Result<bool, StorageError> {
///     let basic = CollectionRef::new("oauth2", "oauth2_basic")?;
///     Ok(store.find_by_id(&basic, id).await?.is_some())
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ==================== Collections ====================

    /// Creates the collection and its expiry index if they do not exist.
    ///
    /// Idempotent: calling it for an existing collection succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues.
    async fn ensure_collection(&self, collection: &CollectionRef) -> Result<(), StorageError>;

    /// Deletes every document whose `expires_at` is at or before `now`.
    ///
    /// Returns the number of documents deleted.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues.
    async fn delete_expired(
        &self,
        collection: &CollectionRef,
        now: OffsetDateTime,
    ) -> Result<u64, StorageError>;

    // ==================== Documents ====================

    /// Inserts a new document, asserting that its ID is not taken.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a live document with the same ID exists.
    async fn insert(&self, collection: &CollectionRef, document: Document)
    -> Result<(), StorageError>;

    /// Replaces the body and expiry of an existing document.
    ///
    /// Returns `false` if no live document with that ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues.
    async fn replace(
        &self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<bool, StorageError>;

    /// Reads a document by ID.
    ///
    /// Returns `None` if the document does not exist or has expired.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing documents.
    async fn find_by_id(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> Result<Option<Document>, StorageError>;

    /// Returns the first live document matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &FieldFilter,
    ) -> Result<Option<Document>, StorageError>;

    /// Deletes a document by ID.
    ///
    /// Returns whether a document was removed. Deleting a missing document
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues.
    async fn delete_by_id(&self, collection: &CollectionRef, id: &str)
    -> Result<bool, StorageError>;

    // ==================== Transactions ====================

    /// Begins a new multi-document transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if transactions are not
    /// supported or cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn DocumentTransaction>, StorageError>;

    // ==================== Metadata ====================

    /// Returns whether this backend supports multi-document transactions.
    fn supports_transactions(&self) -> bool;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction for inserting several documents atomically.
///
/// Inserts are invisible to other readers until `commit` succeeds. Dropping
/// a transaction without committing discards it.
///
/// # Example
///
/// ```ignore
/// let mut tx = store.begin_transaction().await?;
/// tx.insert(&basic, basic_doc).await?;
/// tx.insert(&access, access_doc).await?;
/// tx.commit().await?;
/// ```
#[async_trait]
pub trait DocumentTransaction: Send + Sync {
    /// Stages an insert, asserting that the ID is not taken.
    ///
    /// Backends may detect the duplicate here or at commit time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` on a duplicate ID.
    async fn insert(
        &mut self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<(), StorageError>;

    /// Commits all staged operations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if an assertion failed at commit
    /// time, or `StorageError::TransactionError` if the commit fails.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discards all staged operations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if the rollback fails.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
