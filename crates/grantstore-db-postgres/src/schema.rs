//! Schema management for the PostgreSQL storage backend.
//!
//! Each database maps to a PostgreSQL schema and each collection to a table
//! inside it. Tables share one layout:
//!
//! ```sql
//! CREATE TABLE "<database>"."<collection>" (
//!     id         TEXT PRIMARY KEY,
//!     body       JSONB NOT NULL,
//!     expires_at TIMESTAMPTZ
//! );
//! ```
//!
//! plus a partial index on `expires_at` for the reaper.

use std::sync::Arc;

use dashmap::DashSet;
use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use tracing::{debug, info, instrument};

use grantstore_storage::CollectionRef;

use crate::error::{PostgresError, Result};

const EXPIRY_INDEX_SUFFIX: &str = "_expires_at_idx";

/// Longest collection name whose expiry index name still fits PostgreSQL's
/// 63-byte identifier limit.
const MAX_COLLECTION_NAME_LEN: usize = 63 - EXPIRY_INDEX_SUFFIX.len();

/// Manages the database schema for document collections.
///
/// The `SchemaManager` is responsible for:
/// - Creating schemas and collection tables on demand
/// - Creating the expiry index used by the reaper
/// - Caching which collections are known to exist
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
    /// Collections that have been verified to exist.
    created: Arc<DashSet<CollectionRef>>,
}

impl SchemaManager {
    /// Creates a new `SchemaManager` with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            created: Arc::new(DashSet::new()),
        }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Quoted `"schema"."table"` for a collection.
    ///
    /// Names are validated by `CollectionRef`, so quoting is enough.
    #[must_use]
    pub fn table_name(collection: &CollectionRef) -> String {
        format!("\"{}\".\"{}\"", collection.database(), collection.name())
    }

    /// Name of the expiry index for a collection.
    ///
    /// # Errors
    ///
    /// Returns `PostgresError::Config` if the name would be truncated.
    pub fn expiry_index_name(collection: &CollectionRef) -> Result<String> {
        let name = collection.name();
        if name.len() > MAX_COLLECTION_NAME_LEN {
            return Err(PostgresError::config(format!(
                "collection name '{name}' is longer than {MAX_COLLECTION_NAME_LEN} characters"
            )));
        }
        Ok(format!("{name}{EXPIRY_INDEX_SUFFIX}"))
    }

    /// Returns `true` if the collection is in the cache.
    #[must_use]
    pub fn is_known(&self, collection: &CollectionRef) -> bool {
        self.created.contains(collection)
    }

    /// Ensures the schema, table and expiry index exist for a collection.
    ///
    /// This method is idempotent - calling it multiple times for the same
    /// collection is safe and cheap after the first call due to caching.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    #[instrument(skip(self), fields(collection = %collection))]
    pub async fn ensure_collection(&self, collection: &CollectionRef) -> Result<()> {
        if self.is_known(collection) {
            debug!("Collection found in cache");
            return Ok(());
        }

        let index_name = Self::expiry_index_name(collection)?;
        info!("Ensuring collection table and expiry index");

        let schema_sql = format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", collection.database());
        self.execute_ddl(&schema_sql).await?;

        let table = Self::table_name(collection);
        let table_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                body JSONB NOT NULL,
                expires_at TIMESTAMPTZ
            )
            "#
        );
        self.execute_ddl(&table_sql).await?;

        let index_sql = format!(
            "CREATE INDEX IF NOT EXISTS \"{index_name}\" ON {table} (expires_at) WHERE expires_at IS NOT NULL"
        );
        self.execute_ddl(&index_sql).await?;

        self.created.insert(collection.clone());
        Ok(())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        // Concurrent `IF NOT EXISTS` statements can still race on the catalog;
        // the loser sees a unique violation and the object exists either way.
        match query(sql).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if crate::error::has_pg_error_code(&e, crate::error::PG_UNIQUE_VIOLATION) => {
                debug!("DDL raced with a concurrent creator");
                Ok(())
            }
            Err(e) => Err(PostgresError::Schema(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_is_quoted() {
        let c = CollectionRef::new("oauth2", "oauth2_basic").unwrap();
        assert_eq!(SchemaManager::table_name(&c), "\"oauth2\".\"oauth2_basic\"");
        assert_eq!(
            SchemaManager::expiry_index_name(&c).unwrap(),
            "oauth2_basic_expires_at_idx"
        );
    }

    #[test]
    fn test_long_collection_names_are_rejected() {
        let longest = "a".repeat(MAX_COLLECTION_NAME_LEN);
        let c = CollectionRef::new("oauth2", &longest).unwrap();
        assert_eq!(SchemaManager::expiry_index_name(&c).unwrap().len(), 63);

        let too_long = CollectionRef::new("oauth2", &format!("{longest}b")).unwrap();
        assert!(matches!(
            SchemaManager::expiry_index_name(&too_long),
            Err(PostgresError::Config { .. })
        ));
    }
}
