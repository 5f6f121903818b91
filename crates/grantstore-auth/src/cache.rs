//! Lookup cache placed in front of token resolution.
//!
//! The cache is owned by the composition root and injected into
//! [`TokenStore::with_cache`](crate::TokenStore::with_cache). It is a side
//! channel: a miss always falls through to storage, and every removal
//! invalidates the matching key.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::grant::TokenGrant;

/// Cache of resolved grants keyed by `code:..`, `access:..` or `refresh:..`.
pub trait LookupCache: Send + Sync {
    /// Returns the cached grant if present and not expired.
    fn get(&self, key: &str) -> Option<TokenGrant>;

    /// Stores a grant for at most `ttl`.
    fn set(&self, key: &str, grant: TokenGrant, ttl: Duration);

    /// Drops the entry for `key`, if any.
    fn invalidate(&self, key: &str);
}

/// Shared lookup cache handle.
pub type DynLookupCache = Arc<dyn LookupCache>;

#[derive(Debug, Clone)]
struct CacheEntry {
    grant: TokenGrant,
    expires_at: Instant,
}

/// In-process [`LookupCache`] backed by a `DashMap`.
///
/// Expired entries are dropped lazily on read and by [`purge_expired`].
///
/// [`purge_expired`]: MemoryLookupCache::purge_expired
#[derive(Debug, Default)]
pub struct MemoryLookupCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryLookupCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

impl LookupCache for MemoryLookupCache {
    fn get(&self, key: &str) -> Option<TokenGrant> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.grant.clone());
            }
        } else {
            return None;
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    fn set(&self, key: &str, grant: TokenGrant, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                grant,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}
