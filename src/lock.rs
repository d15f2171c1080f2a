//! Distributed lock collaborator (§5, §6): guards the two moments that must
//! not run concurrently across a process's workers — first bootstrap, and a
//! topology refresh. Grounded on the `try_acquire`/`acquire`/guard shape of
//! `penserai-acteon`'s Redis-backed `DistributedLock`, adapted to an
//! in-memory primitive and to the two distinct acquisition modes below.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::error::{ErrorKind, RedisError, RedisResult};

/// A single named lock (§5): bootstrap blocks every caller until the first
/// one finishes; a topology refresh is best-effort — a worker that loses the
/// race simply waits for the winner's refresh rather than doing its own
/// (§4.5 step 3: "a refresh already in flight is not an error").
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Block until the lock is acquired, bounded by `timeout`. Used once per
    /// process during the first `init_slots` call (§5).
    async fn acquire(&self, name: &str, timeout: Duration) -> RedisResult<()>;

    /// Acquire without blocking; `Ok(false)` means someone else holds it
    /// right now. Used by `refresh_slots` so a losing worker doesn't stall
    /// behind the winner's refresh (§4.5 step 3, §5).
    async fn try_acquire(&self, name: &str) -> RedisResult<bool>;

    /// Release a lock previously acquired via either method above. A no-op
    /// if `name` isn't currently held by this process.
    async fn release(&self, name: &str);
}

/// Default [`DistributedLock`]: one `tokio::sync::Mutex` per lock name,
/// keyed in-process, with held guards tracked in a side table so `release`
/// can take a bare `name` rather than a guard object. Fine for a
/// single-process deployment or tests; a multi-process deployment would
/// swap in a Redis- or etcd-backed implementation behind the same trait.
#[derive(Default)]
pub struct InMemoryLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
    held: DashMap<String, OwnedMutexGuard<()>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        InMemoryLock {
            locks: DashMap::new(),
            held: DashMap::new(),
        }
    }

    fn named(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, name: &str, timeout: Duration) -> RedisResult<()> {
        let mutex = self.named(name);
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(name.to_string(), guard);
                Ok(())
            }
            Err(_) => Err(RedisError::from((
                ErrorKind::ExternalCollaborator,
                "timed out waiting for the init lock",
            ))),
        }
    }

    async fn try_acquire(&self, name: &str) -> RedisResult<bool> {
        let mutex = self.named(name);
        match mutex.try_lock_owned() {
            Ok(guard) => {
                self.held.insert(name.to_string(), guard);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn release(&self, name: &str) {
        self.held.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_fails_while_held_and_succeeds_after_release() {
        let lock = InMemoryLock::new();
        assert!(lock.try_acquire("refresh").await.unwrap());
        assert!(!lock.try_acquire("refresh").await.unwrap());

        lock.release("refresh").await;
        assert!(lock.try_acquire("refresh").await.unwrap());
    }

    #[tokio::test]
    async fn acquire_times_out_when_already_held() {
        let lock = InMemoryLock::new();
        assert!(lock.try_acquire("init").await.unwrap());

        let result = lock.acquire("init", Duration::from_millis(20)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn independent_names_do_not_contend() {
        let lock = InMemoryLock::new();
        assert!(lock.try_acquire("a").await.unwrap());
        assert!(lock.try_acquire("b").await.unwrap());
    }
}
