//! Static configuration for the protocol core.
//!
//! One [`CoreConfig`] instance is built at startup and handed by value to
//! each subsystem constructor. There is no global mutable configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default NFSv4 lease duration, also advertised as `lease_time`.
pub const DEFAULT_LEASE_SECS: u64 = 90;

/// Default grace-period length after a restart.
pub const DEFAULT_GRACE_SECS: u64 = 90;

/// Default server-side timeout for blocked lock acquires.
pub const DEFAULT_LOCK_WAIT_SECS: u64 = 90;

/// Fixed size of an in-cache chunk.
pub const CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Fixed size of a persisted object-store block (multipart part size).
pub const BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Configuration with documented defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// NFSv4 lease duration in seconds. Default 90.
    pub lease_secs: u64,
    /// Grace-period duration in seconds. Default 90.
    pub grace_secs: u64,
    /// Server-side timeout for blocked lock acquires, seconds. Default 90.
    pub lock_wait_secs: u64,
    /// Maximum locks on a single file. Default 1024.
    pub max_locks_per_file: usize,
    /// Maximum locks held by a single client. Default 4096.
    pub max_locks_per_client: usize,
    /// Maximum locks across the whole server. Default 65536.
    pub max_locks_total: usize,
    /// Maximum connections per protocol adapter. Default 1024.
    pub max_connections_per_adapter: usize,
    /// Cache size budget in bytes. Default 1 GiB.
    pub cache_max_bytes: u64,
    /// Number of concurrent flusher upload workers. Default 4.
    pub max_parallel_uploads: usize,
    /// Capacity of the flusher's block-ready channel. Default 256.
    pub flusher_queue_depth: usize,
    /// Maximum operations accepted in one COMPOUND. Default 128.
    pub max_compound_ops: usize,
    /// When true, a lock-store failure halts lock operations instead of
    /// degrading to in-memory-only state. Default true.
    pub strict_persistence: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            lease_secs: DEFAULT_LEASE_SECS,
            grace_secs: DEFAULT_GRACE_SECS,
            lock_wait_secs: DEFAULT_LOCK_WAIT_SECS,
            max_locks_per_file: 1024,
            max_locks_per_client: 4096,
            max_locks_total: 65536,
            max_connections_per_adapter: 1024,
            cache_max_bytes: 1024 * 1024 * 1024,
            max_parallel_uploads: 4,
            flusher_queue_depth: 256,
            max_compound_ops: 128,
            strict_persistence: true,
        }
    }
}

impl CoreConfig {
    /// Parses configuration from TOML, filling unset fields with defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn grace_duration(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
}
