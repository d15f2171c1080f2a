//! Cluster state and bootstrap (§4.1, §4.2, §5).
//!
//! Each named cluster gets one [`ClusterState`], installed lock-free behind
//! an [`ArcSwap`] so a refresh never blocks a concurrent command from
//! reading the slot table it replaces. Clusters are kept in a process-wide
//! registry keyed by name (`DashMap` behind a `once_cell::sync::Lazy`), the
//! same "one state object per identity, shared across callers" shape the
//! teacher uses for its connection map.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::{RedisConnection, TcpConnection};
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::lock::{DistributedLock, InMemoryLock};
use crate::server::ServerList;
use crate::slot_table::SlotTable;
use crate::store::{require_present, InMemorySharedStore, SharedStore};
use crate::topology::{build_slot_table, decode_topology, encode_topology, parse_topology_reply};
use crate::value::Value;

/// One topology snapshot: the `SlotTable` and `ServerList` that describe the
/// same `CLUSTER SLOTS` response (§4.2 invariant). Always read and swapped
/// together so a caller can never observe one half of a refresh.
#[derive(Debug, Default)]
pub struct Topology {
    pub slots: SlotTable,
    pub servers: ServerList,
}

/// Lock-free, shared view of one cluster's routing topology (§4.1).
///
/// `slots` and `servers` are published as a single [`Topology`] behind one
/// `ArcSwap` rather than two independent ones — §4.2/§5 require that a
/// refresh install both atomically, so a reader can never pair a fresh
/// `SlotTable` with a stale `ServerList` (or vice versa) by loading them in
/// two separate steps.
pub struct ClusterState {
    pub(crate) topology: ArcSwap<Topology>,
}

impl ClusterState {
    pub(crate) fn new(slots: SlotTable, servers: ServerList) -> Self {
        ClusterState {
            topology: ArcSwap::from_pointee(Topology { slots, servers }),
        }
    }

    /// One atomic snapshot of the slot table and server list together.
    pub fn topology(&self) -> Arc<Topology> {
        self.topology.load_full()
    }

    fn install(&self, slots: SlotTable, servers: ServerList) {
        self.topology.store(Arc::new(Topology { slots, servers }));
    }
}

static REGISTRY: Lazy<DashMap<String, Arc<ClusterState>>> = Lazy::new(DashMap::new);

/// Fetch the process-wide [`ClusterState`] for `name`, if it's been
/// bootstrapped already.
pub fn lookup(name: &str) -> Option<Arc<ClusterState>> {
    REGISTRY.get(name).map(|entry| entry.clone())
}

fn register(name: &str, state: Arc<ClusterState>) {
    REGISTRY.insert(name.to_string(), state);
}

/// Query one seed node for `CLUSTER SLOTS` (§4.2). A connect failure or a
/// parse failure are both "this seed didn't work"; the caller moves on to
/// the next one.
async fn query_seed(
    host: &str,
    port: u16,
    config: &Config,
) -> RedisResult<(SlotTable, ServerList, String)> {
    let mut conn = connect_with_retry(config, host, port).await?;

    if let Some(secret) = &config.auth_secret {
        conn.auth(secret).await?;
    }

    let reply = conn.command(&[b"CLUSTER", b"SLOTS"]).await?;
    if let Value::Error(message) = &reply {
        return Err(RedisError::with_detail(
            ErrorKind::ResponseError,
            "CLUSTER SLOTS rejected",
            message.clone(),
        ));
    }
    let topology = parse_topology_reply(&reply)?;
    let encoded = encode_topology(&topology)?;
    let (table, servers) = build_slot_table(&topology);
    Ok((table, servers, encoded))
}

/// Walk the current cached `ServerList` (if any) followed by
/// `config.seeds`, stopping at the first host that answers `CLUSTER SLOTS`
/// successfully (§4.2 `fetch_slots`: "combine the current cached ServerList
/// ... with the configured seed list (cached first, seeds appended)").
/// Every host failing is a [`ErrorKind::BootstrapFailed`].
async fn fetch_slots(config: &Config) -> RedisResult<(SlotTable, ServerList, String)> {
    let cached: Vec<(String, u16)> = lookup(&config.name)
        .map(|state| state.topology().servers.iter().map(|s| s.addr()).collect())
        .unwrap_or_default();

    let mut last_err = None;
    for (host, port) in cached.iter().chain(config.seeds.iter()) {
        match query_seed(host, *port, config).await {
            Ok(result) => return Ok(result),
            Err(e) if e.kind() == ErrorKind::AuthFailed => {
                // auth is not transient; don't waste time on the rest of the seeds.
                return Err(e);
            }
            Err(e) => {
                warn!(%host, port, error = %e, "seed did not answer CLUSTER SLOTS");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        RedisError::from((ErrorKind::BootstrapFailed, "serv_list was empty"))
    }))
}

/// Connect with up to `max_connection_attempts`, bailing out early if the
/// cumulative wall time would exceed `max_connection_timeout` (§4.2
/// "Connect-with-retry").
async fn connect_with_retry(config: &Config, ip: &str, port: u16) -> RedisResult<TcpConnection> {
    let deadline = tokio::time::Instant::now() + config.max_connection_timeout;
    let mut last_err = None;

    for attempt in 0..config.max_connection_attempts {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        match TcpConnection::connect(
            ip,
            port,
            config.connect_timeout,
            config.read_timeout,
            config.send_timeout,
        )
        .await
        {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(%ip, port, attempt, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        RedisError::from((ErrorKind::ConnectFailed, "max_connection_timeout exceeded"))
    }))
}

/// Collaborators a [`ClusterState`] bootstrap/refresh (and, for the
/// keepalive pool, every command/pipeline execution) needs, grouped so
/// `ClusterClient` can own and pass them by reference (§6).
pub struct Collaborators {
    pub store: Arc<dyn SharedStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub pool: crate::pool::ConnectionPool,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            store: Arc::new(InMemorySharedStore::new()),
            lock: Arc::new(InMemoryLock::new()),
            pool: crate::pool::ConnectionPool::new(),
        }
    }
}

/// `init_slots` (§4.2, §5): the first call for a given cluster name blocks
/// every other worker in this process behind `refresh_lock_key` while it
/// either restores a previously-persisted topology from the shared store or
/// bootstraps fresh from `config.seeds`, then installs the result into the
/// process-wide registry. Subsequent calls for the same name are instant —
/// they just return the already-registered state.
pub async fn init_slots(
    config: &Config,
    collaborators: &Collaborators,
) -> RedisResult<Arc<ClusterState>> {
    if let Some(existing) = lookup(&config.name) {
        return Ok(existing);
    }

    collaborators
        .lock
        .acquire(&config.refresh_lock_key, config.max_connection_timeout)
        .await?;

    let outcome = async {
        if let Some(existing) = lookup(&config.name) {
            return Ok(existing);
        }

        let (table, servers) = match try_load_slots_from_memory_cache(config, collaborators).await
        {
            Ok(cached) => cached,
            Err(_) => {
                let (table, servers, encoded) = fetch_slots(config).await?;
                try_cache_slots_info_to_memory(config, collaborators, &encoded).await;
                (table, servers)
            }
        };

        let state = Arc::new(ClusterState::new(table, servers));
        register(&config.name, state.clone());
        info!(cluster = %config.name, "cluster state bootstrapped");
        Ok(state)
    }
    .await;

    collaborators.lock.release(&config.refresh_lock_key).await;
    outcome
}

/// Read a previously-persisted topology back out of the shared store
/// (§4.2). Absence or a decode failure both mean "fall through to a live
/// bootstrap" — the caller doesn't need to distinguish them.
async fn try_load_slots_from_memory_cache(
    config: &Config,
    collaborators: &Collaborators,
) -> RedisResult<(SlotTable, ServerList)> {
    let raw = collaborators
        .store
        .get(&config.slots_info_dict_name, &config.name)
        .await?;
    let raw = require_present(raw, "no cached topology present")?;
    let topology = decode_topology(&raw)?;
    Ok(build_slot_table(&topology))
}

/// Persist a freshly fetched topology for the next process to pick up.
/// Failure here is logged, not propagated — losing the cache write doesn't
/// invalidate the bootstrap that just succeeded (§4.2).
async fn try_cache_slots_info_to_memory(config: &Config, collaborators: &Collaborators, encoded: &str) {
    if let Err(e) = collaborators
        .store
        .set(&config.slots_info_dict_name, &config.name, encoded.to_string())
        .await
    {
        warn!(cluster = %config.name, error = %e, "failed to cache slots info");
    }
}

/// `refresh_slots` (§4.2, §4.5 step 3, §5): re-fetch topology from the live
/// seeds and install it. Uses the non-blocking `try_acquire` so a worker
/// that loses the race doesn't stall — it just proceeds with whatever's
/// currently installed, on the assumption the winner's refresh will finish
/// in time for its own next redirect.
pub async fn refresh_slots(config: &Config, collaborators: &Collaborators) -> RedisResult<()> {
    let state = lookup(&config.name).ok_or_else(|| {
        RedisError::from((ErrorKind::BootstrapFailed, "refresh_slots before init_slots"))
    })?;

    if !collaborators
        .lock
        .try_acquire(&config.refresh_lock_key)
        .await?
    {
        return Ok(());
    }

    let result = fetch_slots(config).await;
    let outcome = match result {
        Ok((table, servers, encoded)) => {
            state.install(table, servers);
            try_cache_slots_info_to_memory(config, collaborators, &encoded).await;
            info!(cluster = %config.name, "slot table refreshed");
            Ok(())
        }
        Err(e) => Err(e),
    };

    collaborators.lock.release(&config.refresh_lock_key).await;
    outcome
}

/// Remove a cluster's process-wide state, mainly for tests that need a
/// clean registry between cases.
#[cfg(test)]
pub(crate) fn forget(name: &str) {
    REGISTRY.remove(name);
}

/// Exposed for callers that want to wait out a brief in-flight refresh
/// rather than racing it, e.g. a pipeline commit that just hit CLUSTERDOWN
/// on every node (§4.6).
pub async fn settle_delay() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
