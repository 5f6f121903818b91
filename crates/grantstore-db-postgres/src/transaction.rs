//! PostgreSQL transaction implementation with ACID guarantees.
//!
//! Inserts staged through a [`PostgresTransaction`] are written on the
//! transaction's own connection and become visible to other sessions only
//! when the transaction commits.

use async_trait::async_trait;
use sqlx_postgres::PgTransaction;
use tokio::sync::Mutex;

use grantstore_storage::{CollectionRef, Document, DocumentTransaction, StorageError};

use crate::queries;
use crate::schema::SchemaManager;

/// PostgreSQL transaction wrapper.
///
/// Wraps an sqlx PostgreSQL transaction. The transaction automatically
/// rolls back on drop if not explicitly committed, and its pooled connection
/// is returned to the pool in every case.
pub struct PostgresTransaction {
    /// Taken on commit/rollback. Boxed to avoid a lifetime parameter.
    tx: Mutex<Option<Box<PgTransaction<'static>>>>,
    schema_manager: SchemaManager,
}

impl PostgresTransaction {
    /// Creates a new PostgreSQL transaction.
    pub fn new(tx: PgTransaction<'static>, schema_manager: SchemaManager) -> Self {
        Self {
            tx: Mutex::new(Some(Box::new(tx))),
            schema_manager,
        }
    }
}

#[async_trait]
impl DocumentTransaction for PostgresTransaction {
    async fn insert(
        &mut self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<(), StorageError> {
        // DDL runs on a separate pooled connection; CREATE ... IF NOT EXISTS
        // commits on its own and is harmless if this transaction aborts.
        self.schema_manager.ensure_collection(collection).await?;

        let tx = self.tx.get_mut().as_deref_mut().ok_or_else(|| {
            StorageError::transaction_error("Transaction already completed (committed or rolled back)")
        })?;
        queries::insert(&mut **tx, collection, &document).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to commit transaction: {e}"))
            })?;
            tracing::debug!("Transaction committed successfully");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to rollback transaction: {e}"))
            })?;
            tracing::debug!("Transaction rolled back successfully");
        }
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.tx.get_mut().is_some() {
            tracing::warn!(
                "PostgresTransaction dropped without explicit commit/rollback - will auto-rollback"
            );
            // The inner sqlx Transaction's Drop impl issues the ROLLBACK.
        }
    }
}
