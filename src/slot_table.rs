//! Slot table storage (§3 `SlotTable`) and the Node Picker (§4.2).

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::server::{ReplicaSet, Server, SharedReplicaSet};
use crate::slot::SLOT_SIZE;

/// Fixed-size mapping from slot id to the replica set that owns it.
///
/// Slots a `CLUSTER SLOTS` response didn't cover are simply absent: looking
/// one up surfaces [`ErrorKind::SlotsAbsent`] rather than panicking (§3
/// invariant).
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: Vec<Option<SharedReplicaSet>>,
}

impl SlotTable {
    pub fn empty() -> Self {
        SlotTable {
            slots: vec![None; SLOT_SIZE as usize],
        }
    }

    /// Assign `replica_set` to every slot in `start..=end`. Multiple slots
    /// commonly reference the very same `Arc` (§3).
    pub fn assign_range(&mut self, start: u16, end: u16, replica_set: SharedReplicaSet) {
        for slot in start..=end {
            self.slots[slot as usize] = Some(replica_set.clone());
        }
    }

    pub fn get(&self, slot: u16) -> Option<&SharedReplicaSet> {
        self.slots.get(slot as usize).and_then(|s| s.as_ref())
    }

    pub fn lookup(&self, slot: u16) -> RedisResult<&SharedReplicaSet> {
        self.get(slot).ok_or_else(|| {
            RedisError::from((
                ErrorKind::SlotsAbsent,
                "no slots information present for this slot",
            ))
        })
    }

    /// Every distinct replica set currently installed, used to rebuild the
    /// flat [`crate::server::ServerList`] after a refresh.
    pub fn distinct_replica_sets(&self) -> Vec<SharedReplicaSet> {
        let mut seen = Vec::new();
        for entry in self.slots.iter().flatten() {
            if !seen.iter().any(|existing: &SharedReplicaSet| {
                std::sync::Arc::ptr_eq(existing, entry)
            }) {
                seen.push(entry.clone());
            }
        }
        seen
    }
}

/// Choose an `(ip, port, is_replica)` triple out of a replica set (§4.3).
///
/// `enable_slave_read = false` always returns the master. Otherwise `seed`
/// picks a deterministic index (`seed % len`); without a seed, the choice is
/// uniform random. `is_replica` is `index > 0`.
pub fn pick_node(
    replica_set: &ReplicaSet,
    enable_slave_read: bool,
    seed: Option<usize>,
) -> RedisResult<Server> {
    if replica_set.is_empty() {
        return Err(RedisError::from((
            ErrorKind::ResponseError,
            "serv_list is empty",
        )));
    }
    if !enable_slave_read {
        let master = replica_set.master();
        return Ok(Server::new(master.ip.clone(), master.port, false));
    }
    let len = replica_set.len();
    let index = match seed {
        Some(seed) => seed % len,
        None => {
            use rand::Rng;
            rand::thread_rng().gen_range(0..len)
        }
    };
    let picked = &replica_set.all()[index];
    Ok(Server::new(picked.ip.clone(), picked.port, index > 0))
}
