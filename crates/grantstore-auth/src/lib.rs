//! # grantstore-auth
//!
//! OAuth2 grant persistence on top of a `grantstore-storage` backend.
//!
//! This crate provides:
//! - Token storage: one issuance call fans a grant out to a basic record and
//!   its access/refresh index records in a single transaction
//! - Lookup by authorization code, access token, refresh token or account
//! - Non-cascading removal by each of the three token keys
//! - A background reaper that deletes expired records
//! - Client and user credential stores with Argon2id password hashing
//!
//! ## Modules
//!
//! - [`grant`] - Grant payload and persisted record shapes
//! - [`config`] - Collection naming (`TokenConfig`)
//! - [`token_store`] - Transactional writer, lookup resolver, removals
//! - [`expiry`] - Expiry enforcer and reaper task
//! - [`cache`] - Injectable lookup cache
//! - [`client`] - Client registrations
//! - [`user`] - User records and storage
//! - [`password`] - Argon2id hashing
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use grantstore_auth::{TokenConfig, TokenGrant, TokenStore};
//! use grantstore_db_memory::InMemoryStore;
//! use time::OffsetDateTime;
//!
//! let store = TokenStore::new(Arc::new(InMemoryStore::new()), &TokenConfig::default())?;
//! let now = OffsetDateTime::now_utc();
//! let grant = TokenGrant::new("client", "alice")
//!     .with_access("AT1", now, Duration::from_secs(7200))
//!     .with_refresh("RT1", now, Duration::from_secs(86400));
//! store.create(&grant).await?;
//! assert_eq!(store.get_by_refresh("RT1").await?, Some(grant));
//! ```

pub mod cache;
pub mod client;
pub mod config;
mod deadline;
pub mod expiry;
pub mod grant;
pub mod password;
pub mod token_store;
pub mod user;

pub use cache::{DynLookupCache, LookupCache, MemoryLookupCache};
pub use client::{ClientRecord, ClientStore};
pub use config::{RecordKind, TokenCollections, TokenConfig};
pub use deadline::DEFAULT_OPERATION_TIMEOUT;
pub use expiry::{DEFAULT_POLL_INTERVAL, ExpiryEnforcer, ReaperHandle};
pub use grant::{BasicRecord, GrantShape, IndexRecord, JournalOp, JournalRecord, TokenGrant};
pub use password::{HashedPassword, hash_password, verify_password};
pub use token_store::{LookupKey, TokenStore};
pub use user::{SimpleUser, UserRecord, UserStore};

pub use grantstore_storage::StorageError;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        ClientRecord, ClientStore, ExpiryEnforcer, LookupCache, LookupKey, SimpleUser,
        StorageError, TokenConfig, TokenGrant, TokenStore, UserRecord, UserStore,
    };
}
