//! Pipeline Dispatcher (§4.6): partitions a batch of requests across nodes,
//! runs one native pipeline per node, and reassembles a per-request ordered
//! result, re-executing any individually redirected entry through the
//! Command Executor.

use std::collections::HashMap;

use tracing::warn;

use crate::cluster_state::{refresh_slots, ClusterState, Collaborators};
use crate::config::Config;
use crate::connection::RedisConnection;
use crate::error::{classify_server_error, ErrorKind, RedisError, RedisResult};
use crate::executor::{checkout_or_connect, handle_command_with_retry_from, Target};
use crate::redirect::parse_redirect;
use crate::slot::key_slot;
use crate::slot_table::pick_node;
use crate::value::Value;

/// One queued command, stamped with its position in the caller's batch so
/// the reassembled result preserves submission order (§3, §4.6).
#[derive(Debug, Clone)]
pub struct Request {
    pub cmd: String,
    pub key: String,
    pub args: Vec<Vec<u8>>,
    pub origin_index: usize,
}

fn is_eval_family(cmd: &str) -> bool {
    cmd.eq_ignore_ascii_case("EVAL") || cmd.eq_ignore_ascii_case("EVALSHA")
}

fn wire_args<'a>(req: &'a Request) -> Vec<&'a [u8]> {
    let mut out = Vec::with_capacity(2 + req.args.len());
    out.push(req.cmd.as_bytes());
    if !is_eval_family(&req.cmd) {
        out.push(req.key.as_bytes());
    }
    out.extend(req.args.iter().map(|a| a.as_slice()));
    out
}

/// The queue attached to a client between `init_pipeline` and
/// `commit_pipeline`/`cancel_pipeline` (§3 `PendingPipeline`).
#[derive(Debug, Default)]
pub struct PendingPipeline {
    requests: Vec<Request>,
}

impl PendingPipeline {
    pub fn new() -> Self {
        PendingPipeline::default()
    }

    pub fn push(&mut self, cmd: impl Into<String>, key: impl Into<String>, args: Vec<Vec<u8>>) {
        let origin_index = self.requests.len();
        self.requests.push(Request {
            cmd: cmd.into(),
            key: key.into(),
            args,
            origin_index,
        });
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

struct NodeGroup {
    ip: String,
    port: u16,
    is_replica: bool,
    requests: Vec<Request>,
}

/// `commit_pipeline` (§4.6). Consumes `pending`; an empty pipeline is
/// `PipelineEmpty`.
pub async fn commit_pipeline(
    config: &Config,
    collaborators: &Collaborators,
    state: &ClusterState,
    pending: PendingPipeline,
) -> RedisResult<Vec<Value>> {
    let requests = pending.requests;
    if requests.is_empty() {
        return Err(RedisError::from((
            ErrorKind::PipelineEmpty,
            "commit_pipeline called with no queued requests",
        )));
    }
    let total = requests.len();

    let groups = {
        let snapshot = state.topology();
        let magic_seed = magic_seed(snapshot.servers.len().max(1));

        let mut groups: HashMap<(String, u16), NodeGroup> = HashMap::new();
        for req in requests {
            let slot = key_slot(&req.key);
            let replica_set = snapshot.slots.lookup(slot)?;
            let node = pick_node(replica_set, config.enable_slave_read, Some(magic_seed))?;
            groups
                .entry((node.ip.clone(), node.port))
                .or_insert_with(|| NodeGroup {
                    ip: node.ip.clone(),
                    port: node.port,
                    is_replica: node.is_replica,
                    requests: Vec::new(),
                })
                .requests
                .push(req);
        }
        groups
    };

    let mut final_results: Vec<Option<Value>> = (0..total).map(|_| None).collect();
    let mut refreshed_for_moved = false;

    for (_, group) in groups {
        let replies = match run_node_pipeline(config, collaborators, &group).await {
            Ok(replies) => replies,
            Err(failure) => {
                // Connect failures keep the pool-saturation carve-out; a
                // commit-phase failure always refreshes regardless of
                // saturation, since the redirect/topology it's reporting on
                // is no longer trustworthy either way (§4.6 step 4).
                let should_refresh = match failure.phase {
                    PipelineFailurePhase::Connect => !failure.error.is_pool_saturation(),
                    PipelineFailurePhase::Commit => true,
                };
                if should_refresh {
                    fire_refresh(config, collaborators).await;
                }
                return Err(failure.into_error());
            }
        };

        if replies
            .iter()
            .any(|v| matches!(v, Value::Error(m) if classify_server_error(m) == ErrorKind::ClusterDown))
        {
            return Err(RedisError::from((
                ErrorKind::ClusterDown,
                "pipeline commit observed CLUSTERDOWN",
            )));
        }

        for (req, reply) in group.requests.into_iter().zip(replies.into_iter()) {
            let origin_index = req.origin_index;
            if let Some((host, port)) = parse_redirect(&reply, "ASK")? {
                let result = handle_command_with_retry_from(
                    config,
                    collaborators,
                    state,
                    &req.cmd,
                    &req.key,
                    &req.args,
                    Some(Target { ip: host, port }),
                    true,
                )
                .await?;
                final_results[origin_index] = Some(result);
                continue;
            }
            if let Some((host, port)) = parse_redirect(&reply, "MOVED")? {
                if !refreshed_for_moved {
                    refreshed_for_moved = true;
                    fire_refresh(config, collaborators).await;
                }
                let result = handle_command_with_retry_from(
                    config,
                    collaborators,
                    state,
                    &req.cmd,
                    &req.key,
                    &req.args,
                    Some(Target { ip: host, port }),
                    false,
                )
                .await?;
                final_results[origin_index] = Some(result);
                continue;
            }
            final_results[origin_index] = Some(reply);
        }
    }

    Ok(final_results
        .into_iter()
        .map(|v| v.unwrap_or(Value::Nil))
        .collect())
}

/// Which side of a node pipeline a failure happened on (§4.6 step 4):
/// connect-phase failures get the pool-saturation refresh carve-out, but a
/// commit-phase failure always triggers `refresh_slots()`.
enum PipelineFailurePhase {
    Connect,
    Commit,
}

struct PipelineNodeFailure {
    phase: PipelineFailurePhase,
    error: RedisError,
    ip: String,
    port: u16,
}

impl PipelineNodeFailure {
    /// Pool saturation keeps its own kind regardless of phase so the caller
    /// can still tell "load, not a dead node" apart from a real failure;
    /// otherwise the phase decides the reported kind.
    fn into_error(self) -> RedisError {
        let kind = if self.error.is_pool_saturation() {
            ErrorKind::PoolSaturated
        } else {
            match self.phase {
                PipelineFailurePhase::Connect => ErrorKind::PipelineConnectFailed,
                PipelineFailurePhase::Commit => ErrorKind::PipelineCommitFailed,
            }
        };
        RedisError::with_detail(
            kind,
            "pipeline node failure",
            format!("{}:{}: {}", self.ip, self.port, self.error),
        )
    }
}

async fn run_node_pipeline(
    config: &Config,
    collaborators: &Collaborators,
    group: &NodeGroup,
) -> Result<Vec<Value>, PipelineNodeFailure> {
    let connect = |phase: PipelineFailurePhase, error: RedisError| PipelineNodeFailure {
        phase,
        error,
        ip: group.ip.clone(),
        port: group.port,
    };

    let mut conn = checkout_or_connect(config, collaborators, &group.ip, group.port)
        .await
        .map_err(|e| connect(PipelineFailurePhase::Connect, e))?;

    if let Some(secret) = &config.auth_secret {
        conn.auth(secret)
            .await
            .map_err(|e| connect(PipelineFailurePhase::Connect, e))?;
    }
    if group.is_replica {
        conn.readonly()
            .await
            .map_err(|e| connect(PipelineFailurePhase::Connect, e))?;
    }

    for req in &group.requests {
        let args = wire_args(req);
        conn.queue(&args)
            .await
            .map_err(|e| connect(PipelineFailurePhase::Commit, e))?;
    }

    let replies = conn
        .commit_pipeline(group.requests.len())
        .await
        .map_err(|e| connect(PipelineFailurePhase::Commit, e))?;

    collaborators
        .pool
        .checkin(&group.ip, group.port, conn, config.keepalive_pool_size);
    Ok(replies)
}

async fn fire_refresh(config: &Config, collaborators: &Collaborators) {
    if let Err(e) = refresh_slots(config, collaborators).await {
        warn!(cluster = %config.name, error = %e, "background slot refresh failed during pipeline commit");
    }
}

/// A single uniform-random index shared by every request in the batch
/// (§4.6 "magic seed"), so a pipeline commit lands on a fixed subset of
/// nodes rather than fanning out across every replica.
fn magic_seed(total_server_count: usize) -> usize {
    use rand::Rng;
    rand::thread_rng().gen_range(0..total_server_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ReplicaSet, Server, ServerList};
    use crate::slot_table::SlotTable;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn ok_server() -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = vec![0u8; 512];
                let _ = sock.read(&mut buf).await;
                // two queued commands -> two replies
                sock.write_all(b"+OK\r\n+OK\r\n").await.unwrap();
            }
        });
        (addr.ip().to_string(), addr.port())
    }

    fn single_node_state(ip: String, port: u16) -> ClusterState {
        let mut table = SlotTable::empty();
        let master = Server::new(ip, port, false);
        let set = Arc::new(ReplicaSet::new(master, vec![]));
        table.assign_range(0, 16383, set.clone());
        ClusterState::new(table, ServerList::new(vec![set.master().clone()]))
    }

    #[tokio::test]
    async fn commit_pipeline_preserves_submission_order_on_one_node() {
        let (ip, port) = ok_server().await;
        let config = Config::new("pipeline-test", vec![(ip.clone(), port)]);
        let collaborators = Collaborators::default();
        let state = single_node_state(ip, port);

        let mut pending = PendingPipeline::new();
        pending.push("SET", "a", vec![b"1".to_vec()]);
        pending.push("SET", "b", vec![b"2".to_vec()]);

        let results = commit_pipeline(&config, &collaborators, &state, pending)
            .await
            .unwrap();
        assert_eq!(results, vec![Value::okay(), Value::okay()]);
    }

    #[tokio::test]
    async fn empty_pipeline_is_rejected() {
        let config = Config::new("pipeline-empty-test", vec![("127.0.0.1".into(), 1)]);
        let collaborators = Collaborators::default();
        let state = single_node_state("127.0.0.1".into(), 1);

        let err = commit_pipeline(&config, &collaborators, &state, PendingPipeline::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PipelineEmpty);
    }
}
