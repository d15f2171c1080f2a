//! A Redis Cluster client routing engine: slot directory, MOVED/ASK
//! redirection handling, and a pipelined multi-node dispatcher.
//!
//! ```no_run
//! use redis_cluster_router::{ClusterClient, Config};
//!
//! # async fn run() -> redis_cluster_router::RedisResult<()> {
//! let config = Config::new("my-cluster", vec![("127.0.0.1".to_string(), 7000)]);
//! let client = ClusterClient::new(config).await?;
//! let reply = client.command("GET", "foo", vec![]).await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

mod client;
mod cluster_state;
mod config;
mod connection;
mod error;
mod executor;
mod lock;
mod pipeline;
mod pool;
mod redirect;
mod resp;
mod server;
mod slot;
mod slot_table;
mod store;
mod topology;
mod value;

pub use client::ClusterClient;
pub use cluster_state::{init_slots, refresh_slots, ClusterState, Collaborators};
pub use config::{Config, ConnectOptions, DEFAULT_MAX_CONNECTION_ATTEMPTS, DEFAULT_MAX_REDIRECTION};
pub use connection::{RedisConnection, TcpConnection};
pub use error::{ErrorKind, RedisError, RedisResult};
pub use lock::{DistributedLock, InMemoryLock};
pub use pipeline::{commit_pipeline, PendingPipeline, Request};
pub use redirect::parse_redirect;
pub use server::{ReplicaSet, Server, ServerList, SharedReplicaSet};
pub use slot::key_slot;
pub use slot_table::{pick_node, SlotTable};
pub use store::{InMemorySharedStore, SharedStore};
pub use topology::{build_slot_table, decode_topology, encode_topology, RawNode, RawRange, RawTopology};
pub use value::Value;
