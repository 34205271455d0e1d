use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{LockError, Result};
use crate::service::LockService;

#[derive(Debug, Clone)]
struct Held {
    owner: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Store {
    entries: DashMap<String, Held>,
    unavailable: AtomicBool,
}

/// In-process lock store.
///
/// Cloning or calling [`node`](Self::node) shares the same underlying map,
/// so several schedulers in one process behave like separate cluster nodes.
/// Expiry follows `tokio::time`, which lets paused-clock tests drive TTLs.
#[derive(Debug, Clone)]
pub struct MemoryLockService {
    store: Arc<Store>,
    owner: String,
}

impl MemoryLockService {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            store: Arc::new(Store::default()),
            owner: owner.into(),
        }
    }

    /// A view of the same store acting as a different owner.
    pub fn node(&self, owner: impl Into<String>) -> Self {
        Self {
            store: Arc::clone(&self.store),
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Remaining lifetime of `key`, or `None` if absent or expired.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.store
            .entries
            .get(key)
            .filter(|h| h.expires_at > now)
            .map(|h| h.expires_at - now)
    }

    /// Current holder of `key`, if the lock is live.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.store
            .entries
            .get(key)
            .filter(|h| h.expires_at > now)
            .map(|h| h.owner.clone())
    }

    /// Simulate a partitioned or dead backend: every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.store.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.store.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::Backend("memory lock store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let held = Held {
            owner: self.owner.clone(),
            expires_at: now + ttl,
        };

        // The entry guard holds the shard lock, making check-and-set atomic.
        let acquired = match self.store.entries.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(held);
                true
            }
            Entry::Occupied(mut slot) if slot.get().expires_at <= now => {
                slot.insert(held);
                true
            }
            Entry::Occupied(_) => false,
        };
        debug!(key, owner = %self.owner, acquired, "memory lock acquire");
        Ok(acquired)
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        match self.store.entries.get_mut(key) {
            Some(mut held) if held.owner == self.owner && held.expires_at > now => {
                held.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.store
            .entries
            .remove_if(key, |_, held| held.owner == self.owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn second_owner_cannot_acquire_held_key() {
        let a = MemoryLockService::new("a");
        let b = a.node("b");

        assert!(a.try_acquire("k", TTL).await.unwrap());
        assert!(!b.try_acquire("k", TTL).await.unwrap());
        assert!(!a.try_acquire("k", TTL).await.unwrap());
        assert_eq!(a.holder("k").as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_key_can_be_taken_over() {
        let a = MemoryLockService::new("a");
        let b = a.node("b");

        assert!(a.try_acquire("k", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(b.try_acquire("k", TTL).await.unwrap());
        // the old owner can neither renew nor delete the new holder's key
        assert!(!a.renew("k", TTL).await.unwrap());
        a.release("k").await.unwrap();
        assert_eq!(b.holder("k").as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn renew_extends_expiry() {
        let a = MemoryLockService::new("a");
        assert!(a.try_acquire("k", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(a.renew("k", Duration::from_secs(10)).await.unwrap());
        assert_eq!(a.ttl_remaining("k"), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn release_is_idempotent() {
        let a = MemoryLockService::new("a");
        assert!(a.try_acquire("k", TTL).await.unwrap());
        a.release("k").await.unwrap();
        a.release("k").await.unwrap();
        assert!(a.ttl_remaining("k").is_none());
        assert!(!a.renew("k", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_faults() {
        let a = MemoryLockService::new("a");
        a.set_available(false);
        assert!(matches!(
            a.try_acquire("k", TTL).await,
            Err(LockError::Backend(_))
        ));
        a.set_available(true);
        assert!(a.try_acquire("k", TTL).await.unwrap());
    }
}
