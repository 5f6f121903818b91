//! PostgreSQL implementation of the DocumentStore trait.

use async_trait::async_trait;
use sqlx_core::pool::PoolConnection;
use sqlx_postgres::{PgPool, Postgres};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use grantstore_storage::{
    CollectionRef, Document, DocumentStore, DocumentTransaction, FieldFilter, StorageError,
};

use crate::config::PostgresConfig;
use crate::error::map_sqlx_error;
use crate::pool;
use crate::queries;
use crate::schema::SchemaManager;
use crate::transaction::PostgresTransaction;

/// PostgreSQL storage backend for documents.
///
/// Collections are JSONB tables; databases are PostgreSQL schemas. Every
/// operation leases its own connection from the pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    schema_manager: SchemaManager,
}

impl PostgresStore {
    /// Creates a new `PostgresStore` with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Creates a new `PostgresStore` from an existing connection pool.
    ///
    /// This allows sharing a connection pool between multiple components.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        let schema_manager = SchemaManager::new(pool.clone());
        Self {
            pool,
            schema_manager,
        }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the schema manager.
    #[must_use]
    pub fn schema_manager(&self) -> &SchemaManager {
        &self.schema_manager
    }

    /// Checks that the database answers.
    ///
    /// # Errors
    ///
    /// Returns a connection error if `SELECT 1` fails.
    pub async fn ping(&self) -> Result<(), StorageError> {
        pool::test_connection(&self.pool).await?;
        Ok(())
    }

    async fn lease(&self) -> Result<PoolConnection<Postgres>, StorageError> {
        self.pool.acquire().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn ensure_collection(&self, collection: &CollectionRef) -> Result<(), StorageError> {
        self.schema_manager.ensure_collection(collection).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(collection = %collection))]
    async fn delete_expired(
        &self,
        collection: &CollectionRef,
        now: OffsetDateTime,
    ) -> Result<u64, StorageError> {
        let mut conn = self.lease().await?;
        let removed = queries::delete_expired(&mut conn, collection, now).await?;
        if removed > 0 {
            debug!(removed, "Reaped expired documents");
        }
        Ok(removed)
    }

    #[instrument(skip(self, document), fields(collection = %collection))]
    async fn insert(
        &self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<(), StorageError> {
        self.schema_manager.ensure_collection(collection).await?;
        let mut conn = self.lease().await?;
        queries::insert(&mut conn, collection, &document).await
    }

    async fn replace(
        &self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<bool, StorageError> {
        let mut conn = self.lease().await?;
        queries::replace(&mut conn, collection, &document).await
    }

    async fn find_by_id(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> Result<Option<Document>, StorageError> {
        let mut conn = self.lease().await?;
        queries::find_by_id(&mut conn, collection, id).await
    }

    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &FieldFilter,
    ) -> Result<Option<Document>, StorageError> {
        let mut conn = self.lease().await?;
        queries::find_one(&mut conn, collection, filter).await
    }

    async fn delete_by_id(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> Result<bool, StorageError> {
        let mut conn = self.lease().await?;
        queries::delete_by_id(&mut conn, collection, id).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DocumentTransaction>, StorageError> {
        let tx = self.pool.begin().await.map_err(|e| {
            StorageError::transaction_error(format!("Failed to begin transaction: {e}"))
        })?;
        Ok(Box::new(PostgresTransaction::new(
            tx,
            self.schema_manager.clone(),
        )))
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
