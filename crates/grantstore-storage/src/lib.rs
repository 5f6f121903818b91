//! # grantstore-storage
//!
//! Document storage abstraction layer for grantstore.
//!
//! This crate defines the traits and types that all storage backends must implement.
//! It does not contain any implementations - those are provided by separate crates:
//!
//! - `grantstore-db-memory` - in-memory backend
//! - `grantstore-db-postgres` - PostgreSQL backend
//!
//! ## Overview
//!
//! A backend stores [`Document`]s in named collections ([`CollectionRef`]),
//! grouped by database. Every document may carry an absolute expiry; expired
//! documents are invisible to reads and are removed by
//! [`DocumentStore::delete_expired`].

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{DocumentStore, DocumentTransaction};
pub use types::{CollectionRef, Document, FieldFilter, validate_name};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared storage trait object.
pub type DynDocumentStore = std::sync::Arc<dyn DocumentStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use grantstore_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::{DocumentStore, DocumentTransaction};
    pub use crate::types::{CollectionRef, Document, FieldFilter};
    pub use crate::{DynDocumentStore, StorageResult};
}
