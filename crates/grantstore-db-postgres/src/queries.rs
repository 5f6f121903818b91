//! SQL for document operations.
//!
//! Every function runs on a single `PgConnection`, which is either a pooled
//! lease or the connection owned by an open transaction.

use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgConnection;
use time::OffsetDateTime;

use grantstore_storage::{CollectionRef, Document, FieldFilter, StorageError};

use crate::error::{PG_UNIQUE_VIOLATION, has_pg_error_code, is_undefined_table, map_sqlx_error};
use crate::schema::SchemaManager;

type DocumentTuple = (String, Value, Option<OffsetDateTime>);

fn from_tuple(row: DocumentTuple) -> Document {
    Document {
        id: row.0,
        body: row.1,
        expires_at: row.2,
    }
}

/// Inserts a document, asserting the ID is free.
///
/// A row that has expired but not yet been reaped is overwritten in place,
/// matching read-side visibility. Zero affected rows means a live row holds
/// the ID.
pub(crate) async fn insert(
    conn: &mut PgConnection,
    collection: &CollectionRef,
    document: &Document,
) -> Result<(), StorageError> {
    let table = SchemaManager::table_name(collection);
    let sql = format!(
        r#"
        INSERT INTO {table} AS t (id, body, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE
            SET body = EXCLUDED.body, expires_at = EXCLUDED.expires_at
            WHERE t.expires_at IS NOT NULL AND t.expires_at <= NOW()
        "#
    );

    let result = match query(&sql)
        .bind(&document.id)
        .bind(&document.body)
        .bind(document.expires_at)
        .execute(conn)
        .await
    {
        Ok(result) => result,
        Err(e) if has_pg_error_code(&e, PG_UNIQUE_VIOLATION) => {
            return Err(StorageError::already_exists(
                collection.qualified(),
                &document.id,
            ));
        }
        Err(e) => return Err(map_sqlx_error(e)),
    };

    if result.rows_affected() == 0 {
        return Err(StorageError::already_exists(
            collection.qualified(),
            &document.id,
        ));
    }
    Ok(())
}

/// Replaces body and expiry of a live document. Returns whether a row changed.
pub(crate) async fn replace(
    conn: &mut PgConnection,
    collection: &CollectionRef,
    document: &Document,
) -> Result<bool, StorageError> {
    let table = SchemaManager::table_name(collection);
    let sql = format!(
        r#"
        UPDATE {table}
        SET body = $2, expires_at = $3
        WHERE id = $1
          AND (expires_at IS NULL OR expires_at > NOW())
        "#
    );

    match query(&sql)
        .bind(&document.id)
        .bind(&document.body)
        .bind(document.expires_at)
        .execute(conn)
        .await
    {
        Ok(result) => Ok(result.rows_affected() > 0),
        Err(e) if is_undefined_table(&e) => Ok(false),
        Err(e) => Err(map_sqlx_error(e)),
    }
}

pub(crate) async fn find_by_id(
    conn: &mut PgConnection,
    collection: &CollectionRef,
    id: &str,
) -> Result<Option<Document>, StorageError> {
    let table = SchemaManager::table_name(collection);
    let sql = format!(
        r#"
        SELECT id, body, expires_at
        FROM {table}
        WHERE id = $1
          AND (expires_at IS NULL OR expires_at > NOW())
        "#
    );

    match query_as::<_, DocumentTuple>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
    {
        Ok(row) => Ok(row.map(from_tuple)),
        Err(e) if is_undefined_table(&e) => Ok(None),
        Err(e) => Err(map_sqlx_error(e)),
    }
}

/// Sequential scan over `body->>field = value` conditions.
pub(crate) async fn find_one(
    conn: &mut PgConnection,
    collection: &CollectionRef,
    filter: &FieldFilter,
) -> Result<Option<Document>, StorageError> {
    let table = SchemaManager::table_name(collection);
    let mut sql = format!(
        "SELECT id, body, expires_at FROM {table} \
         WHERE (expires_at IS NULL OR expires_at > NOW())"
    );
    for i in 0..filter.conditions().len() {
        let field = 2 * i + 1;
        sql.push_str(&format!(" AND body->>${} = ${}", field, field + 1));
    }
    sql.push_str(" LIMIT 1");

    let mut q = query_as::<_, DocumentTuple>(&sql);
    for (field, value) in filter.conditions() {
        q = q.bind(field.as_str()).bind(value.as_str());
    }

    match q.fetch_optional(conn).await {
        Ok(row) => Ok(row.map(from_tuple)),
        Err(e) if is_undefined_table(&e) => Ok(None),
        Err(e) => Err(map_sqlx_error(e)),
    }
}

pub(crate) async fn delete_by_id(
    conn: &mut PgConnection,
    collection: &CollectionRef,
    id: &str,
) -> Result<bool, StorageError> {
    let table = SchemaManager::table_name(collection);
    let sql = format!("DELETE FROM {table} WHERE id = $1");

    match query(&sql).bind(id).execute(conn).await {
        Ok(result) => Ok(result.rows_affected() > 0),
        Err(e) if is_undefined_table(&e) => Ok(false),
        Err(e) => Err(map_sqlx_error(e)),
    }
}

pub(crate) async fn delete_expired(
    conn: &mut PgConnection,
    collection: &CollectionRef,
    now: OffsetDateTime,
) -> Result<u64, StorageError> {
    let table = SchemaManager::table_name(collection);
    let sql = format!(
        "DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= $1"
    );

    match query(&sql).bind(now).execute(conn).await {
        Ok(result) => Ok(result.rows_affected()),
        Err(e) if is_undefined_table(&e) => Ok(0),
        Err(e) => Err(map_sqlx_error(e)),
    }
}
