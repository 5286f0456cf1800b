//! Cached topup reads.

use std::time::Duration;

use common::TopupId;
use ledger::TopupLedger;

use crate::error::{Result, TopupError};
use crate::response::TopupResponse;
use crate::services::TopupCache;
use crate::state::SagaStep;

/// Read side for topups, backed by a cache-aside [`TopupCache`].
///
/// Entries expire after `ttl` and are invalidated by the orchestrator after
/// every terminal write, so a read never serves a status older than the
/// last completed saga for longer than the TTL.
pub struct TopupQuery<T: TopupLedger, K: TopupCache> {
    topups: T,
    cache: K,
    ttl: Duration,
}

impl<T: TopupLedger, K: TopupCache> TopupQuery<T, K> {
    pub fn new(topups: T, cache: K, ttl: Duration) -> Self {
        Self { topups, cache, ttl }
    }

    /// Returns the topup, from the cache when possible.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_id(&self, id: TopupId) -> Result<TopupResponse> {
        if let Some(topup) = self.cache.get(id).await {
            tracing::debug!("topup cache hit");
            return Ok(topup.into());
        }

        let topup = self.topups.find_topup_by_id(id).await.map_err(|source| {
            if source.is_not_found() {
                TopupError::TopupNotFound(id)
            } else {
                TopupError::Ledger {
                    step: SagaStep::LoadTopup,
                    source,
                }
            }
        })?;

        self.cache.set(topup.clone(), self.ttl).await;
        Ok(topup.into())
    }
}
