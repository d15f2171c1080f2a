//! Parses a `CLUSTER SLOTS` reply into a [`SlotTable`]/[`ServerList`] pair,
//! and JSON-encodes/decodes the raw topology for the slots-info dict (§4.2,
//! §6 "Persisted state layout").

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::server::{ReplicaSet, Server, ServerList};
use crate::slot_table::SlotTable;
use crate::value::Value;

/// One `[ip, port, nodeid]` triple as `CLUSTER SLOTS` reports it. The node id
/// is carried through for fidelity but unused by routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNode {
    pub ip: String,
    pub port: u16,
    pub node_id: String,
}

/// One `[start, end, master, replica…]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRange {
    pub start: u16,
    pub end: u16,
    pub nodes: Vec<RawNode>,
}

/// The raw topology exactly as `CLUSTER SLOTS` returned it — this is what
/// gets JSON-encoded into the slots-info dict, and round-trips byte-for-byte
/// through `decode(encode(topology)) == topology` (§8 invariant).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTopology(pub Vec<RawRange>);

/// Parse a `CLUSTER SLOTS` reply (`[[start, end, [ip,port,nodeid], …], …]`).
pub fn parse_topology_reply(value: &Value) -> RedisResult<RawTopology> {
    let Value::Bulk(entries) = value else {
        return Err(RedisError::from((
            ErrorKind::ResponseError,
            "CLUSTER SLOTS reply is not an array",
        )));
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Bulk(fields) = entry else {
            continue;
        };
        if fields.len() < 3 {
            continue;
        }
        let start = match &fields[0] {
            Value::Int(n) => *n as u16,
            _ => continue,
        };
        let end = match &fields[1] {
            Value::Int(n) => *n as u16,
            _ => continue,
        };
        let mut nodes = Vec::with_capacity(fields.len() - 2);
        for node in &fields[2..] {
            let Value::Bulk(parts) = node else {
                continue;
            };
            if parts.len() < 2 {
                continue;
            }
            let ip = match parts[0].as_str() {
                Some(ip) if !ip.is_empty() => ip.into_owned(),
                _ => continue,
            };
            let port = match &parts[1] {
                Value::Int(n) => *n as u16,
                _ => continue,
            };
            let node_id = parts
                .get(2)
                .and_then(|v| v.as_str())
                .map(|s| s.into_owned())
                .unwrap_or_default();
            nodes.push(RawNode { ip, port, node_id });
        }
        if nodes.is_empty() {
            continue;
        }
        ranges.push(RawRange { start, end, nodes });
    }
    Ok(RawTopology(ranges))
}

/// Build a [`SlotTable`] and [`ServerList`] from a raw topology. The first
/// node of each range is the master; the rest are replicas (§4.2).
pub fn build_slot_table(topology: &RawTopology) -> (SlotTable, ServerList) {
    let mut table = SlotTable::empty();
    let mut flat = Vec::new();

    for range in &topology.0 {
        let mut nodes = range.nodes.iter();
        let Some(master_raw) = nodes.next() else {
            continue;
        };
        let master = Server::new(master_raw.ip.clone(), master_raw.port, false);
        let replicas: Vec<Server> = nodes
            .map(|n| Server::new(n.ip.clone(), n.port, true))
            .collect();

        flat.push(master.clone());
        flat.extend(replicas.iter().cloned());

        let replica_set = Arc::new(ReplicaSet::new(master, replicas));
        table.assign_range(range.start, range.end, replica_set);
    }

    (table, ServerList::new(flat))
}

/// JSON-encode the raw topology for storage in the slots-info dict.
pub fn encode_topology(topology: &RawTopology) -> RedisResult<String> {
    serde_json::to_string(topology)
        .map_err(|e| RedisError::from((ErrorKind::ResponseError, "failed to encode topology", e.to_string())))
}

/// Decode a previously-encoded topology, e.g. read back from the slots-info
/// dict by a newly started worker (§4.2 `try_load_slots_from_memory_cache`).
pub fn decode_topology(raw: &str) -> RedisResult<RawTopology> {
    serde_json::from_str(raw)
        .map_err(|e| RedisError::from((ErrorKind::ResponseError, "failed to decode topology", e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawTopology {
        RawTopology(vec![
            RawRange {
                start: 0,
                end: 5460,
                nodes: vec![RawNode {
                    ip: "10.0.0.1".into(),
                    port: 7000,
                    node_id: "n1".into(),
                }],
            },
            RawRange {
                start: 5461,
                end: 10922,
                nodes: vec![
                    RawNode {
                        ip: "10.0.0.2".into(),
                        port: 7001,
                        node_id: "n2".into(),
                    },
                    RawNode {
                        ip: "10.0.0.2".into(),
                        port: 7004,
                        node_id: "n2r".into(),
                    },
                ],
            },
        ])
    }

    #[test]
    fn round_trip_encode_decode() {
        let topology = sample();
        let encoded = encode_topology(&topology).unwrap();
        let decoded = decode_topology(&encoded).unwrap();
        assert_eq!(topology, decoded);
    }

    #[test]
    fn slot_table_and_server_list_describe_the_same_snapshot() {
        let topology = sample();
        let (table, servers) = build_slot_table(&topology);

        let in_table = table.lookup(0).unwrap().master().clone();
        assert!(servers.iter().any(|s| *s == in_table));

        let uncovered = table.get(16000);
        assert!(uncovered.is_none());
    }

    #[test]
    fn master_is_first_node_in_each_range() {
        let topology = sample();
        let (table, _) = build_slot_table(&topology);
        let set = table.lookup(5461).unwrap();
        assert_eq!(set.master().port, 7001);
        assert_eq!(set.replicas().len(), 1);
        assert_eq!(set.replicas()[0].port, 7004);
        assert!(set.replicas()[0].is_replica);
    }
}
