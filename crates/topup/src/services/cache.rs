//! Cache-aside store for topup rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::TopupId;
use ledger::Topup;
use tokio::sync::RwLock;

/// Cache of topup rows keyed by ID.
///
/// Populated on read misses and invalidated after every write to the row.
/// A cache failure behaves as a miss; it never fails the caller.
#[async_trait]
pub trait TopupCache: Send + Sync {
    /// Returns the cached row, if present and not expired.
    async fn get(&self, id: TopupId) -> Option<Topup>;

    /// Stores a row for `ttl`.
    async fn set(&self, topup: Topup, ttl: Duration);

    /// Drops the entry for `id`, if any.
    async fn invalidate(&self, id: TopupId);
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<TopupId, (Topup, Instant)>,
    invalidations: usize,
}

/// In-process TTL cache.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTopupCache {
    state: Arc<RwLock<CacheState>>,
}

impl InMemoryTopupCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Returns true if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns how many times [`TopupCache::invalidate`] has been called.
    pub async fn invalidations(&self) -> usize {
        self.state.read().await.invalidations
    }
}

#[async_trait]
impl TopupCache for InMemoryTopupCache {
    async fn get(&self, id: TopupId) -> Option<Topup> {
        let mut state = self.state.write().await;
        let expired = match state.entries.get(&id) {
            Some((topup, expires_at)) if Instant::now() < *expires_at => {
                return Some(topup.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(&id);
        }
        None
    }

    async fn set(&self, topup: Topup, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.state
            .write()
            .await
            .entries
            .insert(topup.id, (topup, expires_at));
    }

    async fn invalidate(&self, id: TopupId) {
        let mut state = self.state.write().await;
        state.invalidations += 1;
        state.entries.remove(&id);
    }
}
