//! Shared store collaborator (§6): the process-wide, cluster-name-keyed
//! key/value dict used to persist the slots-info JSON blob and to back the
//! slot-lock namespace. Grounded on the external-store trait shape used by
//! `penserai-acteon`'s distributed-lock crate (`DistributedLock`/`LockGuard`)
//! — here applied to plain key/value storage instead of locking.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{ErrorKind, RedisError, RedisResult};

/// A key/value store external to the routing engine's own process memory
/// (§6). Implementations are expected to be cheap to clone/share and safe
/// to call from any worker concurrently.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, dict: &str, key: &str) -> RedisResult<Option<String>>;
    async fn set(&self, dict: &str, key: &str, value: String) -> RedisResult<()>;
    async fn delete(&self, dict: &str, key: &str) -> RedisResult<()>;
}

/// Default [`SharedStore`]: an in-process `DashMap`, namespaced by `dict`.
/// Stands in for a real external cache (Redis itself, memcached, etcd, …) in
/// single-process deployments and in tests.
#[derive(Debug, Default)]
pub struct InMemorySharedStore {
    dicts: DashMap<String, DashMap<String, String>>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        InMemorySharedStore {
            dicts: DashMap::new(),
        }
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, dict: &str, key: &str) -> RedisResult<Option<String>> {
        Ok(self
            .dicts
            .get(dict)
            .and_then(|d| d.get(key).map(|v| v.clone())))
    }

    async fn set(&self, dict: &str, key: &str, value: String) -> RedisResult<()> {
        self.dicts
            .entry(dict.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, dict: &str, key: &str) -> RedisResult<()> {
        if let Some(entries) = self.dicts.get(dict) {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Surface a missing key the way §4.2's `try_load_slots_from_memory_cache`
/// expects: absence is not an error, a malformed value is.
pub(crate) fn require_present(value: Option<String>, what: &'static str) -> RedisResult<String> {
    value.ok_or_else(|| RedisError::from((ErrorKind::ExternalCollaborator, what)))
}
