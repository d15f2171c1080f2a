//! Command Executor (§4.5): the single-command retry loop that interprets
//! MOVED/ASK/CLUSTERDOWN and bounds retries at `max_redirection`.

use tracing::{debug, warn};

use crate::cluster_state::{refresh_slots, ClusterState, Collaborators};
use crate::config::Config;
use crate::connection::{RedisConnection, TcpConnection};
use crate::error::{classify_server_error, ErrorKind, RedisError, RedisResult};
use crate::redirect::parse_redirect;
use crate::slot::key_slot;
use crate::slot_table::pick_node;
use crate::value::Value;

/// A specific node to target, carried across redirection iterations.
#[derive(Debug, Clone)]
pub struct Target {
    pub ip: String,
    pub port: u16,
}

fn is_eval_family(cmd: &str) -> bool {
    cmd.eq_ignore_ascii_case("EVAL") || cmd.eq_ignore_ascii_case("EVALSHA")
}

/// Best-effort, fire-and-forget `refresh_slots` — failures are logged, never
/// propagated, since the caller already has its own (more specific) error to
/// return (§4.5, §7: "best-effort refresh").
async fn fire_refresh(config: &Config, collaborators: &Collaborators) {
    if let Err(e) = refresh_slots(config, collaborators).await {
        warn!(cluster = %config.name, error = %e, "background slot refresh failed");
    }
}

/// Check out an idle pooled connection for `(ip, port)` if one's available,
/// else open a fresh one (§5 "Connection lifecycle": "connects (pool hit or
/// new TCP)"). Shared by the single-command executor and the pipeline
/// dispatcher's per-node connect step.
pub(crate) async fn checkout_or_connect(
    config: &Config,
    collaborators: &Collaborators,
    ip: &str,
    port: u16,
) -> RedisResult<TcpConnection> {
    if let Some(conn) = collaborators.pool.checkout(ip, port, config.keepalive_timeout) {
        return Ok(conn);
    }
    TcpConnection::connect(
        ip,
        port,
        config.connect_timeout,
        config.read_timeout,
        config.send_timeout,
    )
    .await
}

/// `handle_command_with_retry` (§4.5). `cmd`/`key`/`args` describe the
/// command to run; `key` is used only for slot routing — for `EVAL`/
/// `EVALSHA`, `args` must already be the full wire arglist
/// (`numkeys, key…, arg…`) and `key` is the extracted routing key.
pub async fn handle_command_with_retry(
    config: &Config,
    collaborators: &Collaborators,
    state: &ClusterState,
    cmd: &str,
    key: &str,
    args: &[Vec<u8>],
) -> RedisResult<Value> {
    handle_command_with_retry_from(config, collaborators, state, cmd, key, args, None, false).await
}

/// Same as [`handle_command_with_retry`], but starting from a known
/// `(ip, port)` rather than a fresh slot lookup — used by the pipeline
/// dispatcher to re-execute a single redirected entry (§4.6 reassembly).
pub async fn handle_command_with_retry_from(
    config: &Config,
    collaborators: &Collaborators,
    state: &ClusterState,
    cmd: &str,
    key: &str,
    args: &[Vec<u8>],
    initial_target: Option<Target>,
    initial_asking: bool,
) -> RedisResult<Value> {
    let slot = key_slot(key);
    let mut target: Option<Target> = initial_target;
    let mut asking = initial_asking;

    let max_attempts = config.max_redirection();
    for attempt in 0..max_attempts {
        let is_last_attempt = attempt + 1 == max_attempts;
        let (ip, port, is_replica) = match &target {
            Some(t) => (t.ip.clone(), t.port, false),
            None => {
                let snapshot = state.topology();
                let replica_set = match snapshot.slots.lookup(slot) {
                    Ok(set) => set.clone(),
                    Err(e) => {
                        fire_refresh(config, collaborators).await;
                        return Err(e);
                    }
                };
                drop(snapshot);
                match pick_node(&replica_set, config.enable_slave_read, None) {
                    Ok(server) => (server.ip, server.port, server.is_replica),
                    Err(e) => {
                        fire_refresh(config, collaborators).await;
                        return Err(e);
                    }
                }
            }
        };

        let connect_result = checkout_or_connect(config, collaborators, &ip, port).await;
        let mut conn = match connect_result {
            Ok(conn) => conn,
            Err(e) => {
                if !e.is_pool_saturation() {
                    fire_refresh(config, collaborators).await;
                }
                if is_last_attempt {
                    return Err(e);
                }
                continue;
            }
        };

        if let Some(secret) = &config.auth_secret {
            if let Err(e) = conn.auth(secret).await {
                fire_refresh(config, collaborators).await;
                return Err(e);
            }
        }

        if is_replica {
            if let Err(e) = conn.readonly().await {
                fire_refresh(config, collaborators).await;
                return Err(e);
            }
        }
        if asking {
            if let Err(e) = conn.asking().await {
                fire_refresh(config, collaborators).await;
                return Err(e);
            }
        }

        let reply = if is_eval_family(cmd) {
            let owned_args: Vec<&[u8]> = std::iter::once(cmd.as_bytes())
                .chain(args.iter().map(|a| a.as_slice()))
                .collect();
            conn.command(&owned_args).await
        } else {
            let owned_args: Vec<&[u8]> = std::iter::once(cmd.as_bytes())
                .chain(std::iter::once(key.as_bytes()))
                .chain(args.iter().map(|a| a.as_slice()))
                .collect();
            conn.command(&owned_args).await
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                fire_refresh(config, collaborators).await;
                return Err(e);
            }
        };

        if let Value::Error(message) = &reply {
            match classify_server_error(message) {
                ErrorKind::MovedRedirect => {
                    let (new_ip, new_port) = parse_redirect(&reply, "MOVED")?
                        .expect("classify_server_error confirmed a MOVED prefix");
                    if new_ip == ip && new_port == port {
                        // The node that owns this slot is itself returning
                        // bad data for it — don't hand the connection back
                        // to other callers (§4.5 step 7).
                        conn.close();
                    } else {
                        collaborators.pool.checkin(&ip, port, conn, config.keepalive_pool_size);
                    }
                    target = Some(Target {
                        ip: new_ip,
                        port: new_port,
                    });
                    asking = false;
                    fire_refresh(config, collaborators).await;
                    continue;
                }
                ErrorKind::AskRedirect => {
                    collaborators.pool.checkin(&ip, port, conn, config.keepalive_pool_size);
                    if asking {
                        return Err(RedisError::from((
                            ErrorKind::NestedAsk,
                            "server replied ASK to an already-ASKING request",
                        )));
                    }
                    let (new_ip, new_port) = parse_redirect(&reply, "ASK")?
                        .expect("classify_server_error confirmed an ASK prefix");
                    target = Some(Target {
                        ip: new_ip,
                        port: new_port,
                    });
                    asking = true;
                    continue;
                }
                ErrorKind::ClusterDown => {
                    // Released, not closed: CLUSTERDOWN is a transient
                    // cluster-wide condition, not evidence this connection
                    // itself is bad (§8 scenario 6).
                    collaborators.pool.checkin(&ip, port, conn, config.keepalive_pool_size);
                    return Err(RedisError::with_detail(
                        ErrorKind::ClusterDown,
                        "CLUSTERDOWN",
                        message.clone(),
                    ));
                }
                _ => {
                    collaborators.pool.checkin(&ip, port, conn, config.keepalive_pool_size);
                    fire_refresh(config, collaborators).await;
                    return Err(RedisError::with_detail(
                        ErrorKind::ResponseError,
                        "server returned an error reply",
                        message.clone(),
                    ));
                }
            }
        }

        debug!(%cmd, %ip, port, "command completed");
        collaborators.pool.checkin(&ip, port, conn, config.keepalive_pool_size);
        return Ok(reply);
    }

    Err(RedisError::from((
        ErrorKind::MaxRedirectionsExceeded,
        "reached maximum redirection attempts",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ReplicaSet, Server};
    use crate::slot_table::SlotTable;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn server_replying(reply: &'static str) -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = vec![0u8; 256];
                loop {
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    if sock.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        });
        (addr.ip().to_string(), addr.port())
    }

    fn single_master_state(ip: String, port: u16) -> ClusterState {
        let mut table = SlotTable::empty();
        let master = Server::new(ip, port, false);
        let set = Arc::new(ReplicaSet::new(master, vec![]));
        table.assign_range(0, 16383, set.clone());
        ClusterState::new(
            table,
            crate::server::ServerList::new(vec![set.master().clone()]),
        )
    }

    #[tokio::test]
    async fn simple_command_returns_ok() {
        let (ip, port) = server_replying("+OK\r\n").await;
        let config = Config::new("exec-test-simple", vec![(ip.clone(), port)]);
        let collaborators = Collaborators::default();
        let state = single_master_state(ip, port);

        let reply = handle_command_with_retry(&config, &collaborators, &state, "SET", "foo", &[b"bar".to_vec()])
            .await
            .unwrap();
        assert_eq!(reply, Value::Status("OK".into()));
    }

    #[tokio::test]
    async fn successful_command_checks_connection_back_into_the_pool() {
        let (ip, port) = server_replying("+OK\r\n").await;
        let config = Config::new("exec-test-pools", vec![(ip.clone(), port)]);
        let collaborators = Collaborators::default();
        let state = single_master_state(ip.clone(), port);

        handle_command_with_retry(&config, &collaborators, &state, "SET", "foo", &[b"bar".to_vec()])
            .await
            .unwrap();

        assert!(collaborators
            .pool
            .checkout(&ip, port, config.keepalive_timeout)
            .is_some());
    }

    #[tokio::test]
    async fn clusterdown_reply_is_fatal_and_not_retried() {
        let (ip, port) = server_replying("-CLUSTERDOWN The cluster is down\r\n").await;
        let config = Config::new("exec-test-down", vec![(ip.clone(), port)]);
        let collaborators = Collaborators::default();
        let state = single_master_state(ip, port);

        let err = handle_command_with_retry(&config, &collaborators, &state, "GET", "foo", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClusterDown);
    }

    #[tokio::test]
    async fn nested_ask_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let self_ask = format!("-ASK 1 {}:{}\r\n", addr.ip(), addr.port());
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let reply = self_ask.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 256];
                    loop {
                        let n = sock.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        if sock.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let config = Config::new("exec-test-nested-ask", vec![(addr.ip().to_string(), addr.port())]);
        let collaborators = Collaborators::default();
        let state = single_master_state(addr.ip().to_string(), addr.port());

        // Every node this server redirects to is itself, so the first ASK
        // sets asking=true and retargets to the same server; the reply to
        // that retry is therefore a nested ASK.
        let err = handle_command_with_retry(&config, &collaborators, &state, "GET", "movingkey", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NestedAsk);
    }
}
