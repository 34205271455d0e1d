use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Minimal contract the scheduler needs from a shared key-value store.
///
/// Implementations must be `Send + Sync` so one instance can be shared by
/// every dispatch task. Renew and release only act on keys held by this
/// service's owner identity.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Atomic set-if-absent with expiry. `Ok(true)` iff the caller now holds `key`.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Refresh the expiry of a held key. `Ok(false)` when the key is gone or
    /// owned by someone else.
    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete a held key. Releasing a key that is not held is a no-op.
    async fn release(&self, key: &str) -> Result<()>;
}

/// Which exclusion domain a lock key covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// One holder across every node of the cluster.
    Server,
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockScope::Server => write!(f, "Server"),
        }
    }
}

/// Key of the cluster-wide lock for `job`: `<prefix>schedule:jobLock:<job>:Server`.
pub fn server_lock_key(prefix: &str, job: &str) -> String {
    lock_key(prefix, job, LockScope::Server)
}

pub fn lock_key(prefix: &str, job: &str, scope: LockScope) -> String {
    format!("{prefix}schedule:jobLock:{job}:{scope}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_key_layout() {
        assert_eq!(
            server_lock_key("", "IpMonitor"),
            "schedule:jobLock:IpMonitor:Server"
        );
        assert_eq!(
            server_lock_key("app:", "Cleanup"),
            "app:schedule:jobLock:Cleanup:Server"
        );
    }

    #[test]
    fn distinct_names_give_distinct_keys() {
        assert_ne!(server_lock_key("p:", "a"), server_lock_key("p:", "b"));
        assert_eq!(server_lock_key("p:", "a"), server_lock_key("p:", "a"));
    }
}
