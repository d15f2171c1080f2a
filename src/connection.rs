//! Connection collaborator (§6): the routing engine never speaks RESP
//! itself to pick a node, it just asks a `RedisConnection` to run a command
//! and hands back whatever `Value` comes back — MOVED/ASK/CLUSTERDOWN all
//! surface as an ordinary `Value::Error` for the executor to classify.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::resp::{encode_command, read_value};
use crate::value::Value;

/// The external connection contract a `ClusterClient` is built against
/// (§6). `connect` is a free function on the implementing type rather than
/// a trait method, mirroring the `redis-rs`-style `Connect` trait split from
/// `ConnectionLike`: constructing a connection and using one are different
/// concerns.
#[async_trait]
pub trait RedisConnection: Send + Sync {
    /// Send one command and read back exactly one reply.
    async fn command(&mut self, args: &[&[u8]]) -> RedisResult<Value>;

    /// `AUTH <secret>`.
    async fn auth(&mut self, secret: &str) -> RedisResult<()> {
        let reply = self.command(&[b"AUTH", secret.as_bytes()]).await?;
        match reply {
            Value::Status(_) => Ok(()),
            Value::Error(message) => Err(RedisError::from((
                ErrorKind::AuthFailed,
                "AUTH rejected",
                message,
            ))),
            _ => Ok(()),
        }
    }

    /// `READONLY`, issued once per connection when slave reads are enabled.
    async fn readonly(&mut self) -> RedisResult<()> {
        self.command(&[b"READONLY"]).await?;
        Ok(())
    }

    /// `ASKING`, issued immediately before the one redirected command that
    /// follows an `-ASK` reply (§4.4).
    async fn asking(&mut self) -> RedisResult<()> {
        self.command(&[b"ASKING"]).await?;
        Ok(())
    }

    /// Queue a command into this connection's outstanding pipeline without
    /// reading a reply yet.
    async fn queue(&mut self, args: &[&[u8]]) -> RedisResult<()>;

    /// Read back one reply per command queued since the last commit, in
    /// order (§4.6).
    async fn commit_pipeline(&mut self, count: usize) -> RedisResult<Vec<Value>>;

    /// Whether the underlying transport still looks alive. Pool eviction
    /// uses this before handing a pooled connection back out.
    fn is_open(&self) -> bool;
}

/// Default [`RedisConnection`] backed by a single `tokio::net::TcpStream`
/// speaking RESP2 (§6 — the engine's own minimal reference collaborator;
/// a production deployment could swap in a pooled multiplexing client
/// without changing anything above this trait).
pub struct TcpConnection {
    stream: BufReader<TcpStream>,
    read_timeout: Duration,
    send_timeout: Duration,
    reused_times: u64,
    open: bool,
}

impl TcpConnection {
    /// Connect to `(host, port)`, bounded by `connect_timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
        send_timeout: Duration,
    ) -> RedisResult<Self> {
        let addr = format!("{host}:{port}");
        trace!(%addr, "opening cluster connection");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                // A connect timeout is a load signal (pool saturation), not
                // evidence the node is down — it must not trigger a slot
                // refresh (§4.5 step 3, §7).
                RedisError::with_detail(ErrorKind::PoolSaturated, "connect timed out", addr.clone())
            })?
            .map_err(|e| {
                RedisError::with_detail(ErrorKind::ConnectFailed, "connect failed", e.to_string())
            })?;
        stream.set_nodelay(true).ok();
        Ok(TcpConnection {
            stream: BufReader::new(stream),
            read_timeout,
            send_timeout,
            reused_times: 0,
            open: true,
        })
    }

    /// How many pipeline/command round-trips this connection has served
    /// since it was checked out of the keepalive pool (§6).
    pub fn get_reused_times(&self) -> u64 {
        self.reused_times
    }

    pub fn set_timeouts(&mut self, read: Duration, send: Duration) {
        self.read_timeout = read;
        self.send_timeout = send;
    }

    async fn write_command(&mut self, args: &[&[u8]]) -> RedisResult<()> {
        let buf = encode_command(args.iter().copied());
        timeout(self.send_timeout, self.stream.get_mut().write_all(&buf))
            .await
            .map_err(|_| RedisError::from((ErrorKind::PoolSaturated, "write timed out")))?
            .map_err(|e| {
                self.open = false;
                RedisError::from(e)
            })?;
        Ok(())
    }

    async fn read_reply(&mut self) -> RedisResult<Value> {
        let result = timeout(self.read_timeout, read_value(&mut self.stream)).await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.open = false;
                Err(e)
            }
            Err(_) => {
                self.open = false;
                Err(RedisError::from((ErrorKind::PoolSaturated, "read timed out")))
            }
        }
    }

    /// `set_keepalive` per §6: close and drop the connection rather than
    /// returning it to the pool once it's been reused past the configured
    /// keepalive window. The pool owner calls this; the connection itself
    /// only needs to report whether it's still usable.
    pub fn close(&mut self) {
        self.open = false;
        debug!(reused_times = self.reused_times, "closing cluster connection");
    }
}

#[async_trait]
impl RedisConnection for TcpConnection {
    async fn command(&mut self, args: &[&[u8]]) -> RedisResult<Value> {
        self.write_command(args).await?;
        let reply = self.read_reply().await?;
        self.reused_times += 1;
        Ok(reply)
    }

    async fn queue(&mut self, args: &[&[u8]]) -> RedisResult<()> {
        self.write_command(args).await
    }

    async fn commit_pipeline(&mut self, count: usize) -> RedisResult<Vec<Value>> {
        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            replies.push(self.read_reply().await?);
        }
        self.reused_times += 1;
        Ok(replies)
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
