//! In-memory document storage backend for grantstore.
//!
//! This crate provides an in-memory implementation of the `DocumentStore`
//! trait from `grantstore-storage`. All collections live behind a single
//! `tokio::sync::RwLock`, which makes transaction commits all-or-nothing for
//! concurrent readers.
//!
//! # Example
//!
//! ```ignore
//! use grantstore_db_memory::InMemoryStore;
//! use grantstore_storage::{CollectionRef, Document, DocumentStore};
//!
//! let store = InMemoryStore::new();
//! let clients = CollectionRef::new("oauth2", "client")?;
//! store.insert(&clients, Document::new("app", serde_json::json!({}))).await?;
//! ```

pub mod storage;
pub mod transaction;

pub use grantstore_storage::{DocumentStore, StorageError};
pub use storage::{InMemoryStore, StoreStats};
pub use transaction::MemoryTransaction;

