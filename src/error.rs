//! Error types surfaced by the routing engine.
//!
//! Mirrors the shape of `redis-rs`'s own `RedisError`/`ErrorKind` pair: a small
//! `Copy` enum classifies the failure, and the error itself carries a static
//! description plus an optional detail string. Callers match on [`ErrorKind`];
//! nothing here depends on `std::error::Error` downcasting.

use std::{fmt, io};

/// Classifies a [`RedisError`]. See the error-handling table in the design
/// notes for which kinds are retried in-band and which are always surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing `name` or empty `serv_list` in [`crate::Config`].
    ConfigInvalid,
    /// Every seed was unreachable, unauthenticated, or failed the topology query.
    BootstrapFailed,
    /// The slot has no replica set in the cached [`crate::SlotTable`].
    SlotsAbsent,
    /// `AUTH` was rejected by the node.
    AuthFailed,
    /// Failed to open a TCP connection to a node.
    ConnectFailed,
    /// Connect failed because the keepalive pool or OS ran out of room, not
    /// because the node is down. Never triggers a slot refresh.
    PoolSaturated,
    /// `-MOVED` reply. Handled in-band; never surfaced to the caller.
    MovedRedirect,
    /// `-ASK` reply. Handled in-band unless it nests (§ [`ErrorKind::NestedAsk`]).
    AskRedirect,
    /// `-CLUSTERDOWN` reply.
    ClusterDown,
    /// An `ASKING`-directed request was itself redirected with `-ASK`.
    NestedAsk,
    /// `CONFIG`, `SHUTDOWN`, or a multi-key `EVAL`.
    UnsupportedCommand,
    /// The single-command retry loop exhausted `max_redirection` iterations.
    MaxRedirectionsExceeded,
    /// `commit_pipeline` was called with no queued requests.
    PipelineEmpty,
    /// Per-node connect failure during pipeline commit, annotated with `ip:port`.
    PipelineConnectFailed,
    /// Per-node commit failure during pipeline commit, annotated with `ip:port`.
    PipelineCommitFailed,
    /// A reply the server returned could not be parsed or decoded.
    ResponseError,
    /// Transport-level I/O failure not otherwise classified above.
    IoError,
    /// A shared-store or distributed-lock primitive misbehaved (§6).
    ExternalCollaborator,
}

impl ErrorKind {
    /// Whether the single-command executor should keep retrying on this kind.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectFailed
                | ErrorKind::PoolSaturated
                | ErrorKind::MovedRedirect
                | ErrorKind::AskRedirect
        )
    }

    /// Whether this kind originated from a cluster-topology signal (as opposed
    /// to a plain I/O failure) and therefore implies the cached slot table may
    /// be stale.
    pub fn is_cluster_error(self) -> bool {
        matches!(
            self,
            ErrorKind::MovedRedirect | ErrorKind::AskRedirect | ErrorKind::ClusterDown
        )
    }
}

/// An error surfaced by the routing engine.
#[derive(Debug, Clone)]
pub struct RedisError {
    kind: ErrorKind,
    description: &'static str,
    detail: Option<String>,
}

impl RedisError {
    /// Build an error, attaching `detail` (e.g. `ip:port`, or the raw server
    /// reply) for display and debugging.
    pub fn with_detail(kind: ErrorKind, description: &'static str, detail: String) -> Self {
        RedisError {
            kind,
            description,
            detail: Some(detail),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_cluster_error(&self) -> bool {
        self.kind.is_cluster_error()
    }

    /// `true` for the two connect failures that indicate load, not a dead
    /// node: pool saturation and a bare connect timeout. Per §4.5 step 3,
    /// these never trigger `refresh_slots`.
    pub fn is_pool_saturation(&self) -> bool {
        matches!(self.kind, ErrorKind::PoolSaturated)
    }
}

impl From<(ErrorKind, &'static str)> for RedisError {
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        RedisError {
            kind,
            description,
            detail: None,
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for RedisError {
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        RedisError::with_detail(kind, description, detail)
    }
}

impl From<io::Error> for RedisError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::PoolSaturated,
            io::ErrorKind::WouldBlock => ErrorKind::PoolSaturated,
            _ => ErrorKind::ConnectFailed,
        };
        RedisError::with_detail(kind, "I/O error", err.to_string())
    }
}

impl fmt::Display for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{:?}: {} ({})", self.kind, self.description, detail),
            None => write!(f, "{:?}: {}", self.kind, self.description),
        }
    }
}

impl std::error::Error for RedisError {}

/// Classify a raw `-ERR ...` reply body by its leading word, as the server
/// sends it (`MOVED`, `ASK`, `CLUSTERDOWN`, or anything else).
pub(crate) fn classify_server_error(message: &str) -> ErrorKind {
    if message.starts_with("MOVED") {
        ErrorKind::MovedRedirect
    } else if message.starts_with("ASK") {
        ErrorKind::AskRedirect
    } else if message.starts_with("CLUSTERDOWN") {
        ErrorKind::ClusterDown
    } else {
        ErrorKind::ResponseError
    }
}

pub type RedisResult<T> = Result<T, RedisError>;
