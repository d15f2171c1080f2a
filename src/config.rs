//! Immutable per-client configuration (§3 `Config`).

use std::time::Duration;

use crate::error::{ErrorKind, RedisError, RedisResult};

/// Default `max_redirection`. An explicit `0` is treated the same as unset
/// (§8 boundary behavior).
pub const DEFAULT_MAX_REDIRECTION: u32 = 5;
/// Default `max_connection_attempts` per seed during bootstrap.
pub const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 3;

/// Opaque, implementation-specific options passed straight through to the
/// connection collaborator's `connect` call (TLS settings, client name,
/// protocol negotiation, …). The routing engine never inspects these itself.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub options: std::collections::HashMap<String, String>,
}

/// Immutable configuration for a [`crate::client::ClusterClient`] (§3).
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub seeds: Vec<(String, u16)>,
    pub auth_secret: Option<String>,

    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub read_timeout: Duration,
    pub keepalive_timeout: Duration,
    pub keepalive_pool_size: usize,

    max_redirection: u32,
    pub max_connection_attempts: u32,
    pub max_connection_timeout: Duration,

    pub enable_slave_read: bool,

    pub slot_lock_dict_name: String,
    pub slots_info_dict_name: String,
    pub refresh_lock_key: String,

    pub connect_options: Option<ConnectOptions>,
}

impl Config {
    /// Build a config for `name` with `seeds`, applying every other default
    /// from the data model below. Use the setters to override any of them.
    pub fn new(name: impl Into<String>, seeds: Vec<(String, u16)>) -> Self {
        let name = name.into();
        Config {
            slot_lock_dict_name: format!("{name}:slot-locks"),
            slots_info_dict_name: format!("{name}:slots-info"),
            refresh_lock_key: format!("{name}:refresh"),
            name,
            seeds,
            auth_secret: None,
            connect_timeout: Duration::from_millis(1_000),
            send_timeout: Duration::from_millis(1_000),
            read_timeout: Duration::from_millis(1_000),
            keepalive_timeout: Duration::from_millis(55_000),
            keepalive_pool_size: 50,
            max_redirection: DEFAULT_MAX_REDIRECTION,
            max_connection_attempts: DEFAULT_MAX_CONNECTION_ATTEMPTS,
            max_connection_timeout: Duration::from_millis(2_000),
            enable_slave_read: false,
            connect_options: None,
        }
    }

    /// `max_redirection`, falling back to the default for both an unset and
    /// an explicit `0` (§8: "both explicit 0 and unset share the same
    /// fallback").
    pub fn max_redirection(&self) -> u32 {
        if self.max_redirection == 0 {
            DEFAULT_MAX_REDIRECTION
        } else {
            self.max_redirection
        }
    }

    pub fn set_max_redirection(mut self, value: u32) -> Self {
        self.max_redirection = value;
        self
    }

    pub fn with_auth(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }

    pub fn with_slave_reads(mut self, enabled: bool) -> Self {
        self.enable_slave_read = enabled;
        self
    }

    /// Validate `name` and `seeds` per §4.7 construction rules.
    pub fn validate(&self) -> RedisResult<()> {
        if self.name.is_empty() {
            return Err(RedisError::from((
                ErrorKind::ConfigInvalid,
                "cluster name must not be empty",
            )));
        }
        if self.seeds.is_empty() {
            return Err(RedisError::from((
                ErrorKind::ConfigInvalid,
                "serv_list must contain at least one seed",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_unset_max_redirection_share_the_default() {
        let unset = Config::new("c", vec![("127.0.0.1".into(), 7000)]);
        let explicit_zero = Config::new("c", vec![("127.0.0.1".into(), 7000)]).set_max_redirection(0);
        assert_eq!(unset.max_redirection(), DEFAULT_MAX_REDIRECTION);
        assert_eq!(explicit_zero.max_redirection(), DEFAULT_MAX_REDIRECTION);
    }

    #[test]
    fn validate_rejects_empty_name_or_seeds() {
        assert!(Config::new("", vec![("h".into(), 1)]).validate().is_err());
        assert!(Config::new("c", vec![]).validate().is_err());
        assert!(Config::new("c", vec![("h".into(), 1)]).validate().is_ok());
    }
}
