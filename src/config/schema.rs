//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for discovery.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Worker count used when `health.pool_size` is 0.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 100;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Deployment environment.
    pub env: Environment,

    /// Backend used by clients of this process.
    pub discovery: BackendKind,

    /// Cached proxy settings (used when `discovery = "proxy"`).
    pub discovery_proxy: DiscoveryProxyConfig,

    /// Coordination backend connection parameters.
    pub coordinator: CoordinatorConfig,

    /// Health engine settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Prod,
}

/// Kind of discovery backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process registry.
    #[default]
    Memory,
    /// Distributed key-value store.
    Etcd,
    /// Disk-cached proxy over another backend.
    Proxy,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::Etcd => "etcd",
            BackendKind::Proxy => "proxy",
        };
        f.write_str(name)
    }
}

/// Disk-cached proxy configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryProxyConfig {
    /// Directory holding one `{service}.json` file per service.
    pub dir: PathBuf,

    /// Backend the proxy wraps.
    pub connection: BackendKind,

    /// How often the live configuration is compared for changes.
    pub poll_interval_ms: u64,

    /// Delay before the sync loop retries a failed full load.
    pub sync_retry_ms: u64,
}

impl Default for DiscoveryProxyConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./discovery-cache"),
            connection: BackendKind::Memory,
            poll_interval_ms: 3000,
            sync_retry_ms: 5000,
        }
    }
}

impl DiscoveryProxyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_retry(&self) -> Duration {
        Duration::from_millis(self.sync_retry_ms)
    }
}

/// Coordination backend connection parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Backend endpoints (e.g., "10.0.0.10:2379").
    pub endpoints: Vec<String>,

    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Per-operation deadline in milliseconds.
    pub op_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            connect_timeout_ms: 5000,
            op_timeout_ms: 5000,
        }
    }
}

impl CoordinatorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Health engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Desired worker count (0 = default of 100).
    pub pool_size: usize,

    /// Pause between sweeps in milliseconds.
    pub interval_ms: u64,

    /// Deadline of a single liveness call.
    pub probe_timeout_ms: u64,

    /// Total probe attempts before eviction.
    pub attempts: u32,

    /// Fixed delay between probe attempts.
    pub retry_delay_ms: u64,

    /// Backoff after a failed full registry load.
    pub load_retry_ms: u64,

    /// Re-check interval while paused.
    pub pause_poll_ms: u64,

    /// Tick of the pool-size reconciliation loop.
    pub resize_tick_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            pool_size: 0,
            interval_ms: 10_000,
            probe_timeout_ms: 5000,
            attempts: 3,
            retry_delay_ms: 5000,
            load_retry_ms: 5000,
            pause_poll_ms: 1000,
            resize_tick_ms: 1000,
        }
    }
}

/// Worker count for a requested pool size; 0 selects the default.
pub fn effective_pool_size(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_WORKER_POOL_SIZE,
        n => n,
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
