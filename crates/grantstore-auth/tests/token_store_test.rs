//! Token store behavior against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grantstore_auth::{
    ExpiryEnforcer, JournalRecord, LookupCache, MemoryLookupCache, TokenConfig, TokenGrant,
    TokenStore,
};
use grantstore_db_memory::InMemoryStore;
use grantstore_storage::{
    CollectionRef, Document, DocumentStore, DocumentTransaction, FieldFilter, StorageError,
};
use serde_json::json;
use time::OffsetDateTime;
use tokio_test::assert_ok;

const HOUR: Duration = Duration::from_secs(3600);

fn setup() -> (Arc<InMemoryStore>, TokenStore) {
    let backend = Arc::new(InMemoryStore::new());
    let store = TokenStore::new(backend.clone(), &TokenConfig::default()).unwrap();
    (backend, store)
}

fn access_grant(access: &str, refresh: &str) -> TokenGrant {
    let now = OffsetDateTime::now_utc();
    let grant = TokenGrant::new("c1", "alice")
        .with_redirect_uri("https://app.example.com/cb")
        .with_scope("read write")
        .with_access(access, now, 2 * HOUR);
    if refresh.is_empty() {
        grant
    } else {
        grant.with_refresh(refresh, now, 24 * HOUR)
    }
}

async fn basic_id_of(backend: &InMemoryStore, store: &TokenStore, access: &str) -> String {
    backend
        .find_by_id(&store.collections().access, access)
        .await
        .unwrap()
        .unwrap()
        .field_str("basic_id")
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_code_round_trip() {
    let (backend, store) = setup();
    let grant = TokenGrant::new("c1", "alice")
        .with_scope("read")
        .with_code("CODE1", OffsetDateTime::now_utc(), Duration::from_secs(600));

    assert_ok!(store.create(&grant).await);
    assert_eq!(store.get_by_code("CODE1").await.unwrap(), Some(grant));

    // Code-only grants have no index records and no journal entry.
    let collections = store.collections();
    assert_eq!(backend.len(&collections.basic).await, 1);
    assert!(backend.is_empty(&collections.access).await);
    assert!(backend.is_empty(&collections.txn).await);
}

#[tokio::test]
async fn test_access_and_refresh_round_trip() {
    let (backend, store) = setup();
    let grant = access_grant("AT1", "RT1");

    assert_ok!(store.create(&grant).await);
    assert_eq!(store.get_by_access("AT1").await.unwrap(), Some(grant.clone()));
    assert_eq!(store.get_by_refresh("RT1").await.unwrap(), Some(grant));

    let collections = store.collections();
    assert_eq!(backend.len(&collections.basic).await, 1);
    assert_eq!(backend.len(&collections.access).await, 1);
    assert_eq!(backend.len(&collections.refresh).await, 1);
    assert_eq!(backend.stats().committed, 1);
}

#[tokio::test]
async fn test_journal_records_every_insert() {
    let (backend, store) = setup();
    store.create(&access_grant("AT1", "RT1")).await.unwrap();

    let basic_id = basic_id_of(&backend, &store, "AT1").await;
    let journal: JournalRecord = backend
        .find_by_id(&store.collections().txn, &basic_id)
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();

    let ids: Vec<_> = journal.ops.iter().map(|op| op.id.as_str()).collect();
    assert_eq!(ids, vec![basic_id.as_str(), "AT1", "RT1"]);
    assert_eq!(journal.ops[1].collection, "oauth2_access");
}

#[tokio::test]
async fn test_access_without_refresh_has_no_refresh_index() {
    let (backend, store) = setup();
    let grant = access_grant("AT1", "");

    store.create(&grant).await.unwrap();
    assert_eq!(store.get_by_access("AT1").await.unwrap(), Some(grant));
    assert!(backend.is_empty(&store.collections().refresh).await);
}

#[tokio::test]
async fn test_basic_id_is_independent_of_tokens() {
    let (backend, store) = setup();
    store.create(&access_grant("AT1", "RT1")).await.unwrap();

    let basic_id = basic_id_of(&backend, &store, "AT1").await;
    assert_eq!(basic_id.len(), 32);
    assert!(basic_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(basic_id, "AT1");
}

#[tokio::test]
async fn test_invalid_grants_are_rejected() {
    let (backend, store) = setup();
    let now = OffsetDateTime::now_utc();

    let empty = TokenGrant::new("c1", "alice");
    assert!(matches!(
        store.create(&empty).await,
        Err(StorageError::InvalidInput { .. })
    ));

    let refresh_only = TokenGrant::new("c1", "alice").with_refresh("RT1", now, HOUR);
    assert!(matches!(
        store.create(&refresh_only).await,
        Err(StorageError::InvalidInput { .. })
    ));

    assert!(backend.is_empty(&store.collections().basic).await);
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let (_backend, store) = setup();

    assert_ok!(store.remove_by_access("missing").await);
    assert_ok!(store.remove_by_access("missing").await);
    assert_ok!(store.remove_by_refresh("missing").await);
    assert_ok!(store.remove_by_code("missing").await);
}

#[tokio::test]
async fn test_removal_does_not_cascade() {
    let (backend, store) = setup();
    let grant = access_grant("AT1", "RT1");
    store.create(&grant).await.unwrap();

    store.remove_by_access("AT1").await.unwrap();
    assert!(store.get_by_access("AT1").await.unwrap().is_none());
    // Basic record and sibling index stay until they expire.
    assert_eq!(store.get_by_refresh("RT1").await.unwrap(), Some(grant));
    assert_eq!(backend.len(&store.collections().basic).await, 1);

    store.remove_by_refresh("RT1").await.unwrap();
    assert!(store.get_by_refresh("RT1").await.unwrap().is_none());
    assert_eq!(backend.len(&store.collections().basic).await, 1);
}

#[tokio::test]
async fn test_remove_by_code() {
    let (_backend, store) = setup();
    let grant = TokenGrant::new("c1", "alice").with_code(
        "CODE1",
        OffsetDateTime::now_utc(),
        Duration::from_secs(600),
    );
    store.create(&grant).await.unwrap();

    store.remove_by_code("CODE1").await.unwrap();
    assert!(store.get_by_code("CODE1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_overall_expiry_takes_earlier_timestamp() {
    let (backend, store) = setup();
    let issued = OffsetDateTime::now_utc();
    let grant = TokenGrant::new("c1", "alice")
        .with_access("AT1", issued, 2 * HOUR)
        .with_refresh("RT1", issued, HOUR);
    store.create(&grant).await.unwrap();

    let expected = issued + time::Duration::hours(1);
    let collections = store.collections();
    let basic_id = basic_id_of(&backend, &store, "AT1").await;

    let basic = backend
        .find_by_id(&collections.basic, &basic_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(basic.expires_at, Some(expected));

    for (collection, id) in [(&collections.access, "AT1"), (&collections.refresh, "RT1")] {
        let index = backend.find_by_id(collection, id).await.unwrap().unwrap();
        assert_eq!(index.expires_at, Some(expected));
    }
}

#[tokio::test]
async fn test_duplicate_access_token_is_rejected() {
    let (backend, store) = setup();
    let first = access_grant("AT1", "RT1");
    store.create(&first).await.unwrap();

    let second = access_grant("AT1", "RT2").with_scope("admin");
    let err = store.create(&second).await.unwrap_err();
    assert!(err.is_already_exists());

    assert_eq!(store.get_by_access("AT1").await.unwrap(), Some(first));
    assert!(store.get_by_refresh("RT2").await.unwrap().is_none());
    assert_eq!(backend.len(&store.collections().basic).await, 1);
    assert_eq!(backend.len(&store.collections().txn).await, 1);
}

#[tokio::test]
async fn test_duplicate_code_is_rejected() {
    let (_backend, store) = setup();
    let now = OffsetDateTime::now_utc();
    let first = TokenGrant::new("c1", "alice").with_code("CODE1", now, HOUR);
    store.create(&first).await.unwrap();

    let second = TokenGrant::new("c2", "bob").with_code("CODE1", now, HOUR);
    assert!(store.create(&second).await.unwrap_err().is_already_exists());
    assert_eq!(store.get_by_code("CODE1").await.unwrap(), Some(first));
}

#[tokio::test]
async fn test_concurrent_writers_one_wins() {
    let (backend, store) = setup();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .create(&access_grant("AT-shared", &format!("RT{i}")))
                .await
        }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert!(e.is_already_exists(), "unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(backend.len(&store.collections().basic).await, 1);
    assert_eq!(backend.len(&store.collections().refresh).await, 1);
}

#[tokio::test]
async fn test_reaped_basic_record_resolves_to_none() {
    let (backend, store) = setup();
    let grant = access_grant("AT1", "RT1");
    store.create(&grant).await.unwrap();
    assert_eq!(store.get_by_access("AT1").await.unwrap(), Some(grant));

    let basic_id = basic_id_of(&backend, &store, "AT1").await;
    assert!(
        backend
            .delete_by_id(&store.collections().basic, &basic_id)
            .await
            .unwrap()
    );

    assert!(store.get_by_access("AT1").await.unwrap().is_none());
    assert!(store.get_by_refresh("RT1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_grant_is_invisible_and_reaped() {
    let (backend, store) = setup();
    let issued = OffsetDateTime::now_utc() - time::Duration::hours(3);
    let grant = TokenGrant::new("c1", "alice")
        .with_access("AT1", issued, 2 * HOUR)
        .with_refresh("RT1", issued, 24 * HOUR);
    store.create(&grant).await.unwrap();

    assert!(store.get_by_access("AT1").await.unwrap().is_none());
    assert!(store.get_by_refresh("RT1").await.unwrap().is_none());

    let enforcer = ExpiryEnforcer::for_tokens(backend.clone(), store.collections());
    enforcer.configure().await.unwrap();
    assert_eq!(enforcer.reap_once().await.unwrap(), 4);
    for collection in store.collections().iter() {
        assert!(backend.is_empty(collection).await);
    }
}

#[tokio::test]
async fn test_get_by_account() {
    let (_backend, store) = setup();
    let grant = access_grant("AT1", "RT1");
    store.create(&grant).await.unwrap();

    assert_eq!(
        store.get_by_account("alice", "c1").await.unwrap(),
        Some(grant)
    );
    assert!(store.get_by_account("alice", "c2").await.unwrap().is_none());
    assert!(store.get_by_account("bob", "c1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_account_lookup_ignores_grants_without_refresh() {
    let (_backend, store) = setup();
    store.create(&access_grant("AT1", "")).await.unwrap();
    assert!(store.get_by_account("alice", "c1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_degraded_mode_compensates_partial_writes() {
    let backend = Arc::new(InMemoryStore::without_transactions());
    let store = TokenStore::new(backend.clone(), &TokenConfig::default()).unwrap();

    // Without a transaction, a full write still lands every record.
    let grant = access_grant("AT1", "RT1");
    store.create(&grant).await.unwrap();
    assert_eq!(store.get_by_refresh("RT1").await.unwrap(), Some(grant));
    assert!(backend.is_empty(&store.collections().txn).await);

    // The refresh insert fails; the basic and access inserts are undone.
    let clash = access_grant("AT2", "RT1");
    assert!(store.create(&clash).await.unwrap_err().is_already_exists());

    assert!(store.get_by_access("AT2").await.unwrap().is_none());
    assert_eq!(backend.len(&store.collections().basic).await, 1);
    assert_eq!(backend.len(&store.collections().access).await, 1);
}

#[tokio::test]
async fn test_custom_collection_names() {
    let backend = Arc::new(InMemoryStore::new());
    let config = TokenConfig {
        database: "auth".into(),
        basic_collection: "grants".into(),
        ..TokenConfig::default()
    };
    let store = TokenStore::new(backend.clone(), &config).unwrap();
    store.create(&access_grant("AT1", "RT1")).await.unwrap();

    let grants = CollectionRef::new("auth", "grants").unwrap();
    assert_eq!(backend.len(&grants).await, 1);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = TokenConfig {
        txn_collection: "oauth2.txn".into(),
        ..TokenConfig::default()
    };
    let err = TokenStore::new(Arc::new(InMemoryStore::new()), &config).unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_cache_serves_and_invalidates() {
    let backend = Arc::new(InMemoryStore::new());
    let cache = Arc::new(MemoryLookupCache::new());
    let store = TokenStore::new(backend.clone(), &TokenConfig::default())
        .unwrap()
        .with_cache(cache.clone(), Duration::from_secs(60));

    let grant = access_grant("AT1", "RT1");
    store.create(&grant).await.unwrap();
    assert_eq!(store.get_by_access("AT1").await.unwrap(), Some(grant.clone()));
    assert_eq!(cache.get("access:AT1"), Some(grant.clone()));

    // Served from the cache even after the index is gone from storage.
    backend
        .delete_by_id(&store.collections().access, "AT1")
        .await
        .unwrap();
    assert_eq!(store.get_by_access("AT1").await.unwrap(), Some(grant));

    store.remove_by_access("AT1").await.unwrap();
    assert!(cache.get("access:AT1").is_none());
    assert!(store.get_by_access("AT1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_account_lookups_are_not_cached() {
    let cache = Arc::new(MemoryLookupCache::new());
    let store = TokenStore::new(Arc::new(InMemoryStore::new()), &TokenConfig::default())
        .unwrap()
        .with_cache(cache.clone(), Duration::from_secs(60));

    store.create(&access_grant("AT1", "RT1")).await.unwrap();
    store.get_by_account("alice", "c1").await.unwrap();
    assert!(cache.is_empty());
}

/// Backend wrapper that can fail commits after every insert was staged,
/// and delay reads or deletes.
#[derive(Clone)]
struct FaultyStore {
    inner: InMemoryStore,
    fail_commit: bool,
    read_delay: Duration,
    delete_delay: Duration,
}

impl FaultyStore {
    fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_commit: false,
            read_delay: Duration::ZERO,
            delete_delay: Duration::ZERO,
        }
    }
}

struct FaultyTransaction {
    inner: Box<dyn DocumentTransaction>,
    fail_commit: bool,
}

#[async_trait]
impl DocumentTransaction for FaultyTransaction {
    async fn insert(
        &mut self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<(), StorageError> {
        self.inner.insert(collection, document).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if self.fail_commit {
            self.inner.rollback().await?;
            return Err(StorageError::transaction_error("commit interrupted"));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn ensure_collection(&self, collection: &CollectionRef) -> Result<(), StorageError> {
        self.inner.ensure_collection(collection).await
    }

    async fn delete_expired(
        &self,
        collection: &CollectionRef,
        now: OffsetDateTime,
    ) -> Result<u64, StorageError> {
        self.inner.delete_expired(collection, now).await
    }

    async fn insert(
        &self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<(), StorageError> {
        self.inner.insert(collection, document).await
    }

    async fn replace(
        &self,
        collection: &CollectionRef,
        document: Document,
    ) -> Result<bool, StorageError> {
        self.inner.replace(collection, document).await
    }

    async fn find_by_id(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> Result<Option<Document>, StorageError> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.find_by_id(collection, id).await
    }

    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &FieldFilter,
    ) -> Result<Option<Document>, StorageError> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.find_one(collection, filter).await
    }

    async fn delete_by_id(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> Result<bool, StorageError> {
        tokio::time::sleep(self.delete_delay).await;
        self.inner.delete_by_id(collection, id).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DocumentTransaction>, StorageError> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin_transaction().await?,
            fail_commit: self.fail_commit,
        }))
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

#[tokio::test]
async fn test_interrupted_commit_leaves_nothing_visible() {
    let inner = InMemoryStore::new();
    let backend = FaultyStore {
        fail_commit: true,
        ..FaultyStore::new(inner.clone())
    };
    let store = TokenStore::new(Arc::new(backend), &TokenConfig::default()).unwrap();

    let err = store
        .create(&access_grant("AT1", "RT1"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    assert!(store.get_by_access("AT1").await.unwrap().is_none());
    assert!(store.get_by_refresh("RT1").await.unwrap().is_none());
    for collection in store.collections().iter() {
        assert!(inner.is_empty(collection).await);
    }
    assert_eq!(inner.stats().committed, 0);

    // The failed attempt left no key behind, so a retry succeeds.
    let retry = TokenStore::new(Arc::new(inner), &TokenConfig::default()).unwrap();
    assert_ok!(retry.create(&access_grant("AT1", "RT1")).await);
}

#[tokio::test]
async fn test_dropped_transaction_leaves_nothing_visible() {
    let (backend, store) = setup();
    let collections = store.collections().clone();

    {
        let mut tx = backend.begin_transaction().await.unwrap();
        tx.insert(
            &collections.basic,
            Document::new("b1", json!({"token": access_grant("AT1", "")})),
        )
        .await
        .unwrap();
        tx.insert(
            &collections.access,
            Document::new("AT1", json!({"basic_id": "b1"})),
        )
        .await
        .unwrap();
        // Dropped before commit.
    }

    assert!(store.get_by_access("AT1").await.unwrap().is_none());
    assert_eq!(backend.stats().aborted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_lookup_times_out() {
    let backend = FaultyStore {
        read_delay: Duration::from_secs(10),
        ..FaultyStore::new(InMemoryStore::new())
    };
    let store = TokenStore::new(Arc::new(backend), &TokenConfig::default())
        .unwrap()
        .with_operation_timeout(Duration::from_millis(50));

    let err = store.get_by_access("AT1").await.unwrap_err();
    assert!(matches!(err, StorageError::Timeout { .. }));
    assert!(err.is_retryable());
}

fn cached_store(backend: FaultyStore) -> TokenStore {
    TokenStore::new(Arc::new(backend), &TokenConfig::default())
        .unwrap()
        .with_cache(Arc::new(MemoryLookupCache::new()), HOUR)
}

#[tokio::test(start_paused = true)]
async fn test_lookup_during_slow_delete_is_not_cached() {
    let store = cached_store(FaultyStore {
        delete_delay: Duration::from_millis(100),
        ..FaultyStore::new(InMemoryStore::new())
    });
    store.create(&access_grant("AT1", "RT1")).await.unwrap();

    let removal = {
        let store = store.clone();
        tokio::spawn(async move { store.remove_by_access("AT1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The index row is still in storage while the delete is in flight.
    assert!(store.get_by_access("AT1").await.unwrap().is_some());

    removal.await.unwrap().unwrap();
    assert!(store.get_by_access("AT1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_lookup_started_before_removal_does_not_refill_cache() {
    let store = cached_store(FaultyStore {
        read_delay: Duration::from_millis(50),
        ..FaultyStore::new(InMemoryStore::new())
    });
    store.create(&access_grant("AT1", "RT1")).await.unwrap();

    // Reads the index at 50ms and the basic record at 100ms.
    let lookup = {
        let store = store.clone();
        tokio::spawn(async move { store.get_by_access("AT1").await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    store.remove_by_access("AT1").await.unwrap();

    assert!(lookup.await.unwrap().unwrap().is_some());
    assert!(store.get_by_access("AT1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_code_lookup_ignores_access_grants() {
    let (backend, store) = setup();
    store.create(&access_grant("AT1", "RT1")).await.unwrap();
    let basic_id = basic_id_of(&backend, &store, "AT1").await;

    assert!(store.get_by_code(&basic_id).await.unwrap().is_none());
    assert!(store.get_by_access("AT1").await.unwrap().is_some());
}
