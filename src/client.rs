//! Client Facade (§4.7): construction, dynamic command dispatch, the
//! `EVAL`/`EVALSHA` key-extraction shim, broadcast commands, blocked
//! commands, and the pipeline-queueing toggle.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::cluster_state::{init_slots, ClusterState, Collaborators};
use crate::config::Config;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::executor::handle_command_with_retry;
use crate::pipeline::{commit_pipeline, PendingPipeline};
use crate::value::Value;

const NO_KEY_SENTINEL: &str = "no_key";

fn is_blocked(cmd: &str) -> bool {
    cmd.eq_ignore_ascii_case("CONFIG") || cmd.eq_ignore_ascii_case("SHUTDOWN")
}

fn is_broadcast(cmd: &str) -> bool {
    cmd.eq_ignore_ascii_case("FLUSHALL") || cmd.eq_ignore_ascii_case("FLUSHDB")
}

fn is_eval_family(cmd: &str) -> bool {
    cmd.eq_ignore_ascii_case("EVAL") || cmd.eq_ignore_ascii_case("EVALSHA")
}

/// A cluster-aware client bound to one named cluster (§4.7).
///
/// Cheap to clone: everything mutable lives behind `Arc`/`Mutex`, so a
/// `ClusterClient` can be shared across tasks the way a connection pool
/// handle would be.
#[derive(Clone)]
pub struct ClusterClient {
    config: Arc<Config>,
    collaborators: Arc<Collaborators>,
    state: Arc<ClusterState>,
    pipeline: Arc<Mutex<Option<PendingPipeline>>>,
}

impl ClusterClient {
    /// Build a client for `config`, bootstrapping its [`ClusterState`] via
    /// `init_slots` (§4.7: "Construction... calls init_slots").
    pub async fn new(config: Config) -> RedisResult<Self> {
        Self::with_collaborators(config, Collaborators::default()).await
    }

    pub async fn with_collaborators(
        config: Config,
        collaborators: Collaborators,
    ) -> RedisResult<Self> {
        config.validate()?;
        let collaborators = Arc::new(collaborators);
        let state = init_slots(&config, &collaborators).await?;
        Ok(ClusterClient {
            config: Arc::new(config),
            collaborators,
            state,
            pipeline: Arc::new(Mutex::new(None)),
        })
    }

    /// `init_pipeline()` (§4.6 "Open"). Replaces any pipeline already open.
    pub async fn init_pipeline(&self) {
        *self.pipeline.lock().await = Some(PendingPipeline::new());
    }

    /// `cancel_pipeline()`: detach and drop the pending request list.
    pub async fn cancel_pipeline(&self) {
        self.pipeline.lock().await.take();
    }

    /// `commit_pipeline()`: detach the pending list and execute it (§4.6
    /// "Commit").
    pub async fn commit_pipeline(&self) -> RedisResult<Vec<Value>> {
        let pending = self
            .pipeline
            .lock()
            .await
            .take()
            .ok_or_else(|| RedisError::from((ErrorKind::PipelineEmpty, "no pipeline is open")))?;
        commit_pipeline(&self.config, &self.collaborators, &self.state, pending).await
    }

    /// Dynamic dispatch entry point (§9): every concrete command method in
    /// a hand-written client idiom (`set`, `get`, …) would funnel through
    /// this. `key` drives routing; for `EVAL`/`EVALSHA` pass the *script*
    /// and routing key separately via [`ClusterClient::eval`] instead.
    pub async fn command(&self, cmd: &str, key: &str, args: Vec<Vec<u8>>) -> RedisResult<Value> {
        if is_blocked(cmd) {
            return Err(RedisError::from((
                ErrorKind::UnsupportedCommand,
                "command not supported",
            )));
        }

        // A pipeline queues every command, broadcast commands included —
        // there is no carve-out in §4.6/§4.7 for FLUSHALL/FLUSHDB while a
        // PendingPipeline is open.
        if let Some(pending) = self.pipeline.lock().await.as_mut() {
            pending.push(cmd, key, args);
            return Ok(Value::Nil);
        }

        if is_broadcast(cmd) {
            return self.broadcast(cmd, args).await;
        }

        handle_command_with_retry(&self.config, &self.collaborators, &self.state, cmd, key, &args).await
    }

    /// `EVAL`/`EVALSHA` shim (§4.7, §8): Redis syntax is
    /// `(script, numkeys, key1…keyN, arg1…)`. Only `numkeys` of 0 or 1 is
    /// supported.
    pub async fn eval(
        &self,
        cmd: &str,
        script_or_sha: &str,
        keys: &[String],
        extra_args: &[Vec<u8>],
    ) -> RedisResult<Value> {
        if !is_eval_family(cmd) {
            return Err(RedisError::from((
                ErrorKind::UnsupportedCommand,
                "eval() called with a non-EVAL command name",
            )));
        }
        let routing_key = match keys.len() {
            0 => NO_KEY_SENTINEL.to_string(),
            1 => keys[0].clone(),
            _ => {
                return Err(RedisError::from((
                    ErrorKind::UnsupportedCommand,
                    "cannot execute eval with more than one keys for redis cluster",
                )));
            }
        };

        let mut args = Vec::with_capacity(2 + keys.len() + extra_args.len());
        args.push(script_or_sha.as_bytes().to_vec());
        args.push(keys.len().to_string().into_bytes());
        args.extend(keys.iter().map(|k| k.as_bytes().to_vec()));
        args.extend(extra_args.iter().cloned());

        if let Some(pending) = self.pipeline.lock().await.as_mut() {
            pending.push(cmd, routing_key, args);
            return Ok(Value::Nil);
        }

        handle_command_with_retry(
            &self.config,
            &self.collaborators,
            &self.state,
            cmd,
            &routing_key,
            &args,
        )
        .await
    }

    /// `FLUSHALL`/`FLUSHDB`: sent to every master in the current
    /// `ServerList`; errors are aggregated rather than short-circuiting
    /// (§4.7 "Broadcast commands").
    async fn broadcast(&self, cmd: &str, args: Vec<Vec<u8>>) -> RedisResult<Value> {
        let masters: Vec<(String, u16)> = self
            .state
            .topology()
            .servers
            .masters()
            .into_iter()
            .map(|s| (s.ip.clone(), s.port))
            .collect();

        let mut errors = Vec::new();
        for (ip, port) in masters {
            let target = crate::executor::Target { ip: ip.clone(), port };
            let result = crate::executor::handle_command_with_retry_from(
                &self.config,
                &self.collaborators,
                &self.state,
                cmd,
                NO_KEY_SENTINEL,
                &args,
                Some(target),
                false,
            )
            .await;
            if let Err(e) = result {
                warn!(%ip, port, error = %e, "broadcast command failed on a master");
                errors.push(format!("{ip}:{port}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(Value::okay())
        } else {
            Err(RedisError::with_detail(
                ErrorKind::ResponseError,
                "broadcast command failed on one or more masters",
                errors.join("; "),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn fake_seed_and_master() -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let slots_reply = format!(
            "*1\r\n*3\r\n:0\r\n:16383\r\n*3\r\n$9\r\n127.0.0.1\r\n:{}\r\n$2\r\nn1\r\n",
            addr.port()
        );
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let reply = slots_reply.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 256];
                    loop {
                        let n = sock.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        let out = if buf[..n].windows(6).any(|w| w == b"SLOTS\r") {
                            reply.clone()
                        } else {
                            "+OK\r\n".to_string()
                        };
                        if sock.write_all(out.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn config_and_shutdown_are_rejected_without_network_activity() {
        let (ip, port) = fake_seed_and_master().await;
        let config = Config::new("client-test-blocked", vec![(ip, port)]);
        let client = ClusterClient::new(config).await.unwrap();

        let err = client.command("CONFIG", "", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCommand);
        let err = client.command("SHUTDOWN", "", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCommand);
    }

    #[tokio::test]
    async fn eval_rejects_more_than_one_key() {
        let (ip, port) = fake_seed_and_master().await;
        let config = Config::new("client-test-eval", vec![(ip, port)]);
        let client = ClusterClient::new(config).await.unwrap();

        let err = client
            .eval("EVAL", "return 1", &["a".into(), "b".into()], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCommand);
    }

    #[tokio::test]
    async fn queued_commands_during_a_pipeline_are_not_executed_immediately() {
        let (ip, port) = fake_seed_and_master().await;
        let config = Config::new("client-test-pipeline", vec![(ip, port)]);
        let client = ClusterClient::new(config).await.unwrap();

        client.init_pipeline().await;
        let queued = client.command("SET", "a", vec![b"1".to_vec()]).await.unwrap();
        assert_eq!(queued, Value::Nil);

        let results = client.commit_pipeline().await.unwrap();
        assert_eq!(results, vec![Value::okay()]);
    }
}
