//! Keepalive connection pool (§3 `Config::keepalive_timeout`/
//! `keepalive_pool_size`, §5 "Connection lifecycle"): a bounded, per-`(ip,
//! port)` cache of idle connections so a command issued against a node it
//! already talked to recently doesn't pay a fresh TCP handshake.
//!
//! Checked out before `TcpConnection::connect`, checked back in after a
//! successful operation — never for a connection the caller has explicitly
//! closed (self-redirecting `MOVED`, a dead handshake) or one still mid-error.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::connection::TcpConnection;

struct Idle {
    conn: TcpConnection,
    returned_at: Instant,
}

/// Bounded per-node cache of idle, still-open connections.
#[derive(Default)]
pub struct ConnectionPool {
    by_node: DashMap<(String, u16), VecDeque<Idle>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool::default()
    }

    /// Pop an idle connection for `(ip, port)` younger than `ttl`, discarding
    /// anything older or no longer open along the way.
    pub fn checkout(&self, ip: &str, port: u16, ttl: Duration) -> Option<TcpConnection> {
        let mut queue = self.by_node.get_mut(&(ip.to_string(), port))?;
        while let Some(idle) = queue.pop_front() {
            if idle.conn.is_open() && idle.returned_at.elapsed() < ttl {
                return Some(idle.conn);
            }
        }
        None
    }

    /// Return `conn` to the pool for `(ip, port)`, unless it's no longer open
    /// or the node's queue is already at `capacity` (§3 `keepalive_pool_size`).
    pub fn checkin(&self, ip: &str, port: u16, conn: TcpConnection, capacity: usize) {
        if capacity == 0 || !conn.is_open() {
            return;
        }
        let mut queue = self.by_node.entry((ip.to_string(), port)).or_default();
        if queue.len() < capacity {
            queue.push_back(Idle {
                conn,
                returned_at: Instant::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_server() -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    loop {
                        use tokio::io::AsyncReadExt;
                        if sock.read(&mut buf).await.unwrap_or(0) == 0 {
                            break;
                        }
                    }
                });
            }
        });
        (addr.ip().to_string(), addr.port())
    }

    async fn connect(ip: &str, port: u16) -> TcpConnection {
        TcpConnection::connect(
            ip,
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn empty_pool_checkout_is_none() {
        let pool = ConnectionPool::new();
        assert!(pool
            .checkout("127.0.0.1", 7000, Duration::from_secs(1))
            .is_none());
    }

    #[tokio::test]
    async fn checked_in_connection_is_checked_out_again() {
        let (ip, port) = echo_server().await;
        let pool = ConnectionPool::new();
        let conn = connect(&ip, port).await;

        pool.checkin(&ip, port, conn, 4);
        assert!(pool.checkout(&ip, port, Duration::from_secs(60)).is_some());
        // the queue is now empty again
        assert!(pool.checkout(&ip, port, Duration::from_secs(60)).is_none());
    }

    #[tokio::test]
    async fn checkin_respects_zero_capacity() {
        let (ip, port) = echo_server().await;
        let pool = ConnectionPool::new();
        let conn = connect(&ip, port).await;

        pool.checkin(&ip, port, conn, 0);
        assert!(pool.checkout(&ip, port, Duration::from_secs(60)).is_none());
    }

    #[tokio::test]
    async fn checkin_past_capacity_is_dropped() {
        let (ip, port) = echo_server().await;
        let pool = ConnectionPool::new();

        pool.checkin(&ip, port, connect(&ip, port).await, 1);
        pool.checkin(&ip, port, connect(&ip, port).await, 1);

        assert!(pool.checkout(&ip, port, Duration::from_secs(60)).is_some());
        assert!(pool.checkout(&ip, port, Duration::from_secs(60)).is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let (ip, port) = echo_server().await;
        let pool = ConnectionPool::new();
        pool.checkin(&ip, port, connect(&ip, port).await, 4);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool
            .checkout(&ip, port, Duration::from_millis(1))
            .is_none());
    }
}
