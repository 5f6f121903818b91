//! Token persistence: transactional fan-out, lookup and removal.
//!
//! A code-only grant is one basic record keyed by the code. An access grant
//! is a basic record under a generated ID, an access index record and, when
//! a refresh token was issued, a refresh index record. All of them share
//! the grant's overall expiry, so an index never outlives the record it
//! points to by more than one reaper tick.
//!
//! Removal never cascades: deleting an index record leaves the basic record
//! and any sibling index to expire on their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use grantstore_storage::{
    CollectionRef, Document, DynDocumentStore, FieldFilter, StorageError,
};

use crate::cache::DynLookupCache;
use crate::config::{RecordKind, TokenCollections, TokenConfig};
use crate::deadline::{DEFAULT_OPERATION_TIMEOUT, with_deadline};
use crate::grant::{BasicRecord, GrantShape, IndexRecord, JournalOp, JournalRecord, TokenGrant};

/// Key a grant can be resolved by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    /// Matches authorization-code grants only, never access grants sharing
    /// the basic collection.
    Code(String),
    Access(String),
    Refresh(String),
    /// First refresh index entry issued to this user for this client.
    Account { user_id: String, client_id: String },
}

impl LookupKey {
    /// Cache key, or `None` for lookups that are never cached.
    fn cache_key(&self) -> Option<String> {
        match self {
            LookupKey::Code(code) => Some(format!("code:{code}")),
            LookupKey::Access(token) => Some(format!("access:{token}")),
            LookupKey::Refresh(token) => Some(format!("refresh:{token}")),
            LookupKey::Account { .. } => None,
        }
    }
}

/// Shortened token for logs.
pub(crate) fn token_prefix(token: &str) -> &str {
    token
        .char_indices()
        .nth(6)
        .map_or(token, |(end, _)| &token[..end])
}

#[derive(Clone)]
struct CacheBinding {
    cache: DynLookupCache,
    ttl: Duration,
    /// Bumped by every removal. A lookup only fills the cache if no removal
    /// started after it began reading storage.
    removals: Arc<Mutex<u64>>,
}

impl CacheBinding {
    fn removals(&self) -> MutexGuard<'_, u64> {
        self.removals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self) -> u64 {
        *self.removals()
    }

    fn fill(&self, seen: u64, key: &str, grant: &TokenGrant) {
        let removals = self.removals();
        if *removals != seen {
            debug!("Skipping cache fill after a concurrent removal");
            return;
        }
        let ttl = cache_ttl(self.ttl, grant, OffsetDateTime::now_utc());
        self.cache.set(key, grant.clone(), ttl);
    }

    fn evict(&self, key: &str) {
        let mut removals = self.removals();
        *removals = removals.wrapping_add(1);
        self.cache.invalidate(key);
    }
}

/// OAuth2 token store over a [`DocumentStore`](grantstore_storage::DocumentStore).
///
/// Cheap to clone; clones share the backend, cache and degraded-mode state.
#[derive(Clone)]
pub struct TokenStore {
    store: DynDocumentStore,
    collections: TokenCollections,
    operation_timeout: Duration,
    cache: Option<CacheBinding>,
    degraded_warned: Arc<AtomicBool>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("backend", &self.store.backend_name())
            .field("collections", &self.collections)
            .field("operation_timeout", &self.operation_timeout)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl TokenStore {
    /// Creates a token store over `store` using the collections in `config`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if `config` is invalid.
    pub fn new(store: DynDocumentStore, config: &TokenConfig) -> Result<Self, StorageError> {
        Ok(Self {
            store,
            collections: config.resolve()?,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            cache: None,
            degraded_warned: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Puts `cache` in front of code, access and refresh lookups.
    ///
    /// Entries live for at most `ttl`, and never past the grant's expiry.
    #[must_use]
    pub fn with_cache(mut self, cache: DynLookupCache, ttl: Duration) -> Self {
        self.cache = Some(CacheBinding {
            cache,
            ttl,
            removals: Arc::new(Mutex::new(0)),
        });
        self
    }

    /// Sets the deadline applied to every operation.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn collections(&self) -> &TokenCollections {
        &self.collections
    }

    #[must_use]
    pub fn backend(&self) -> &DynDocumentStore {
        &self.store
    }

    /// Persists a freshly issued grant.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a grant with neither code nor access token, or
    ///   with a refresh token and no access token.
    /// - `AlreadyExists` if the code, access or refresh token is taken. Nothing
    ///   from this call is left behind.
    /// - A retryable error for backend failures and timeouts.
    #[instrument(skip_all, fields(client_id = %grant.client_id))]
    pub async fn create(&self, grant: &TokenGrant) -> Result<(), StorageError> {
        let shape = grant.shape()?;
        with_deadline("create", self.operation_timeout, async {
            match shape {
                GrantShape::Code => self.create_code(grant).await,
                GrantShape::Access { .. } => self.create_access(grant).await,
            }
        })
        .await
    }

    async fn create_code(&self, grant: &TokenGrant) -> Result<(), StorageError> {
        let record = BasicRecord {
            token: grant.clone(),
        };
        let document = Document::from_serializable(&grant.code, &record)?
            .with_expiry(grant.code_expires_at()?);

        self.store.insert(&self.collections.basic, document).await?;
        debug!(code = token_prefix(&grant.code), "Stored authorization code");
        Ok(())
    }

    async fn create_access(&self, grant: &TokenGrant) -> Result<(), StorageError> {
        let expiry = grant.overall_expiry()?;
        let basic_id = Uuid::new_v4().simple().to_string();

        let basic = BasicRecord {
            token: grant.clone(),
        };
        let index = IndexRecord::for_grant(&basic_id, grant);

        let mut writes = vec![
            (
                self.collections.basic.clone(),
                Document::from_serializable(&basic_id, &basic)?.with_expiry(expiry),
            ),
            (
                self.collections.access.clone(),
                Document::from_serializable(&grant.access, &index)?.with_expiry(expiry),
            ),
        ];
        if grant.has_refresh() {
            writes.push((
                self.collections.refresh.clone(),
                Document::from_serializable(&grant.refresh, &index)?.with_expiry(expiry),
            ));
        }

        if self.store.supports_transactions() {
            self.write_transactional(&basic_id, writes, expiry).await?;
        } else {
            self.write_compensating(writes).await?;
        }

        debug!(
            basic_id = %basic_id,
            access = token_prefix(&grant.access),
            refresh = token_prefix(&grant.refresh),
            "Stored access grant"
        );
        Ok(())
    }

    /// Inserts every document plus a journal entry in one transaction.
    async fn write_transactional(
        &self,
        basic_id: &str,
        writes: Vec<(CollectionRef, Document)>,
        expiry: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let journal = JournalRecord {
            ops: writes
                .iter()
                .map(|(collection, document)| JournalOp {
                    collection: collection.name().to_string(),
                    id: document.id.clone(),
                })
                .collect(),
            created_at: OffsetDateTime::now_utc(),
        };
        let journal = Document::from_serializable(basic_id, &journal)?.with_expiry(expiry);

        let mut tx = self.store.begin_transaction().await?;
        let staged = async {
            for (collection, document) in writes {
                tx.insert(&collection, document).await?;
            }
            tx.insert(&self.collections.txn, journal).await
        }
        .await;

        if let Err(e) = staged {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Failed to roll back token transaction");
            }
            return Err(e);
        }
        tx.commit().await
    }

    /// Sequential inserts for backends without transactions. Inserts that
    /// succeeded are deleted again if a later one fails; a concurrent reader
    /// may briefly see the partial set.
    async fn write_compensating(
        &self,
        writes: Vec<(CollectionRef, Document)>,
    ) -> Result<(), StorageError> {
        if !self.degraded_warned.swap(true, Ordering::Relaxed) {
            warn!(
                backend = self.store.backend_name(),
                "Backend has no transactions; token writes are not atomic"
            );
        }

        let mut applied: Vec<(CollectionRef, String)> = Vec::with_capacity(writes.len());
        for (collection, document) in writes {
            let id = document.id.clone();
            if let Err(e) = self.store.insert(&collection, document).await {
                for (collection, id) in applied.iter().rev() {
                    if let Err(undo_err) = self.store.delete_by_id(collection, id).await {
                        warn!(
                            collection = %collection,
                            error = %undo_err,
                            "Failed to undo partial token write"
                        );
                    }
                }
                return Err(e);
            }
            applied.push((collection, id));
        }
        Ok(())
    }

    /// Resolves a grant by any of its keys. `Ok(None)` means not found or
    /// expired.
    pub async fn resolve(&self, key: &LookupKey) -> Result<Option<TokenGrant>, StorageError> {
        let cache_key = key.cache_key();
        let mut seen = 0;
        if let (Some(binding), Some(cache_key)) = (&self.cache, &cache_key) {
            seen = binding.epoch();
            if let Some(grant) = binding.cache.get(cache_key) {
                debug!("Lookup served from cache");
                return Ok(Some(grant));
            }
        }

        let grant = with_deadline("resolve", self.operation_timeout, async {
            match key {
                LookupKey::Code(code) => Ok(self
                    .read_basic(code)
                    .await?
                    .filter(TokenGrant::has_code)),
                LookupKey::Access(token) => self.resolve_index(RecordKind::Access, token).await,
                LookupKey::Refresh(token) => self.resolve_index(RecordKind::Refresh, token).await,
                LookupKey::Account { user_id, client_id } => {
                    self.resolve_account(user_id, client_id).await
                }
            }
        })
        .await?;

        if let (Some(binding), Some(cache_key), Some(grant)) = (&self.cache, &cache_key, &grant) {
            binding.fill(seen, cache_key, grant);
        }
        Ok(grant)
    }

    #[instrument(skip_all, fields(code = token_prefix(code)))]
    pub async fn get_by_code(&self, code: &str) -> Result<Option<TokenGrant>, StorageError> {
        self.resolve(&LookupKey::Code(code.to_string())).await
    }

    #[instrument(skip_all, fields(access = token_prefix(access)))]
    pub async fn get_by_access(&self, access: &str) -> Result<Option<TokenGrant>, StorageError> {
        self.resolve(&LookupKey::Access(access.to_string())).await
    }

    #[instrument(skip_all, fields(refresh = token_prefix(refresh)))]
    pub async fn get_by_refresh(&self, refresh: &str) -> Result<Option<TokenGrant>, StorageError> {
        self.resolve(&LookupKey::Refresh(refresh.to_string())).await
    }

    /// Resolves the grant behind a refresh token issued to `user_id` for
    /// `client_id`. Scans the refresh index without an index on the pair.
    #[instrument(skip(self))]
    pub async fn get_by_account(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Option<TokenGrant>, StorageError> {
        self.resolve(&LookupKey::Account {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
        })
        .await
    }

    async fn read_basic(&self, id: &str) -> Result<Option<TokenGrant>, StorageError> {
        let Some(document) = self.store.find_by_id(&self.collections.basic, id).await? else {
            return Ok(None);
        };
        let record: BasicRecord = document.decode()?;
        Ok(Some(record.token))
    }

    async fn resolve_index(
        &self,
        kind: RecordKind,
        token: &str,
    ) -> Result<Option<TokenGrant>, StorageError> {
        let collection = self.collections.collection(kind);
        let Some(document) = self.store.find_by_id(collection, token).await? else {
            return Ok(None);
        };
        let index: IndexRecord = document.decode()?;
        self.follow(&index).await
    }

    async fn resolve_account(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Option<TokenGrant>, StorageError> {
        let filter = FieldFilter::new()
            .eq("user_id", user_id)
            .eq("client_id", client_id);
        let Some(document) = self
            .store
            .find_one(&self.collections.refresh, &filter)
            .await?
        else {
            return Ok(None);
        };
        let index: IndexRecord = document.decode()?;
        self.follow(&index).await
    }

    async fn follow(&self, index: &IndexRecord) -> Result<Option<TokenGrant>, StorageError> {
        let grant = self.read_basic(&index.basic_id).await?;
        if grant.is_none() {
            debug!(basic_id = %index.basic_id, "Index record outlived its basic record");
        }
        Ok(grant)
    }

    /// Deletes the code-keyed basic record. Missing codes are not an error.
    #[instrument(skip_all, fields(code = token_prefix(code)))]
    pub async fn remove_by_code(&self, code: &str) -> Result<(), StorageError> {
        self.remove(RecordKind::Basic, code, LookupKey::Code(code.to_string()))
            .await
    }

    /// Deletes the access index record only.
    #[instrument(skip_all, fields(access = token_prefix(access)))]
    pub async fn remove_by_access(&self, access: &str) -> Result<(), StorageError> {
        self.remove(RecordKind::Access, access, LookupKey::Access(access.to_string()))
            .await
    }

    /// Deletes the refresh index record only.
    #[instrument(skip_all, fields(refresh = token_prefix(refresh)))]
    pub async fn remove_by_refresh(&self, refresh: &str) -> Result<(), StorageError> {
        self.remove(
            RecordKind::Refresh,
            refresh,
            LookupKey::Refresh(refresh.to_string()),
        )
        .await
    }

    /// Evicts the cache entry on both sides of the delete: lookups that read
    /// storage before the delete finished can neither keep nor re-add it.
    async fn remove(&self, kind: RecordKind, id: &str, key: LookupKey) -> Result<(), StorageError> {
        let binding = self.cache.as_ref().zip(key.cache_key());
        if let Some((binding, cache_key)) = &binding {
            binding.evict(cache_key);
        }

        let collection = self.collections.collection(kind);
        let removed = with_deadline("remove", self.operation_timeout, async {
            self.store.delete_by_id(collection, id).await
        })
        .await;

        if let Some((binding, cache_key)) = &binding {
            binding.evict(cache_key);
        }
        let removed = removed?;
        debug!(removed, "Removed token record");
        Ok(())
    }
}

/// Cache lifetime: the configured TTL, cut short at the grant's expiry.
fn cache_ttl(ttl: Duration, grant: &TokenGrant, now: OffsetDateTime) -> Duration {
    let expiry = if grant.has_code() {
        grant.code_expires_at()
    } else {
        grant.overall_expiry()
    };
    match expiry {
        Ok(expiry) => Duration::try_from(expiry - now).map_or(Duration::ZERO, |left| left.min(ttl)),
        Err(_) => Duration::ZERO,
    }
}
