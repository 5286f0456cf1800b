//! Keyed async mutexes serializing saga sections.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use common::{CardNumber, TopupId};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle entries are pruned once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// Hands out one async mutex per key.
///
/// Sections holding different keys never contend.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Arc<Mutex<HashMap<K, Arc<Mutex<()>>>>>,
}

/// Serializes balance read-modify-write per card.
///
/// The saldo ledger only offers absolute writes, so two sagas on the same
/// card must not interleave between reading the balance and writing the
/// new total.
pub type CardLocks = KeyedLocks<CardNumber>;

/// Serializes updates of the same topup.
///
/// An update derives its balance delta from the stored amount, so the
/// load, the amount write and the balance write must not interleave with
/// another update of the same topup.
pub type TopupLocks = KeyedLocks<TopupId>;

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                // Only the map holds a reference to an idle entry
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Returns the number of keys with a lock entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Returns true if no key has a lock entry.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_card_is_exclusive() {
        let locks = CardLocks::new();
        let card = CardNumber::new("4111");

        let guard = locks.lock(&card).await;
        let contender = {
            let locks = locks.clone();
            let card = card.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&card).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_cards_do_not_contend() {
        let locks = CardLocks::new();
        let _a = locks.lock(&CardNumber::new("4111")).await;
        let _b = locks.lock(&CardNumber::new("5500")).await;
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn test_same_topup_is_exclusive() {
        let locks = TopupLocks::new();
        let guard = locks.lock(&TopupId::new(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&TopupId::new(1)).await;
            })
        };
        let _other = locks.lock(&TopupId::new(2)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = CardLocks::new();
        for i in 0..=PRUNE_THRESHOLD {
            let _guard = locks.lock(&CardNumber::new(format!("card-{i}"))).await;
        }
        assert_eq!(locks.len().await, PRUNE_THRESHOLD + 1);

        let _guard = locks.lock(&CardNumber::new("fresh")).await;
        assert_eq!(locks.len().await, 1);
    }
}
