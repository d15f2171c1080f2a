//! Data model (§3): `Server`, `ReplicaSet`, `ServerList`.

use std::fmt;
use std::sync::Arc;

/// A single cluster node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Server {
    pub ip: String,
    pub port: u16,
    pub is_replica: bool,
}

impl Server {
    pub fn new(ip: impl Into<String>, port: u16, is_replica: bool) -> Self {
        Server {
            ip: ip.into(),
            port,
            is_replica,
        }
    }

    pub fn addr(&self) -> (String, u16) {
        (self.ip.clone(), self.port)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// The master plus zero or more replicas covering a contiguous slot range.
/// The master is always at index 0 (§3 invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    servers: Vec<Server>,
}

impl ReplicaSet {
    pub fn new(master: Server, replicas: Vec<Server>) -> Self {
        debug_assert!(!master.is_replica);
        let mut servers = Vec::with_capacity(1 + replicas.len());
        servers.push(master);
        servers.extend(replicas);
        ReplicaSet { servers }
    }

    pub fn master(&self) -> &Server {
        &self.servers[0]
    }

    pub fn replicas(&self) -> &[Server] {
        &self.servers[1..]
    }

    pub fn all(&self) -> &[Server] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Build a degenerate, empty replica set. Real topologies never produce
    /// one of these; this exists so routing code's empty-set handling is
    /// testable.
    #[doc(hidden)]
    pub fn empty_for_test() -> Self {
        ReplicaSet { servers: vec![] }
    }
}

/// Flat list of every [`Server`] appearing in any [`ReplicaSet`] of a
/// topology snapshot, duplicates permitted (§3: "used for pipeline fan-out
/// sizing and seed fallback").
#[derive(Debug, Clone, Default)]
pub struct ServerList {
    servers: Vec<Server>,
}

impl ServerList {
    pub fn new(servers: Vec<Server>) -> Self {
        ServerList { servers }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Every master in the snapshot, deduplicated, used by the broadcast
    /// commands `FLUSHALL`/`FLUSHDB` (§4.7).
    pub fn masters(&self) -> Vec<&Server> {
        let mut seen = std::collections::HashSet::new();
        self.servers
            .iter()
            .filter(|s| !s.is_replica)
            .filter(|s| seen.insert((s.ip.as_str(), s.port)))
            .collect()
    }
}

pub type SharedReplicaSet = Arc<ReplicaSet>;
