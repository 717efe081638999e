// Copyright 2020 Alex Dukhno
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process-wide configuration. Loading configuration from a file or the
//! environment is out of scope for this crate; callers build a [`Config`]
//! however they see fit and hand it to the [`crate::supervisor::Gateway`] by
//! reference.

use std::time::Duration;

/// Configuration for a single protocol endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Whether this endpoint should be started.
    pub enabled: bool,
    /// Address to bind the TCP listener to.
    pub bind_address: String,
    /// Port to bind the TCP listener to.
    pub port: u16,
}

impl EndpointConfig {
    fn new(enabled: bool, port: u16) -> Self {
        EndpointConfig {
            enabled,
            bind_address: "0.0.0.0".to_owned(),
            port,
        }
    }
}

/// Per-connection and per-query resource caps enforced by the circuit
/// breaker middleware.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum number of queries in flight on a single connection.
    pub max_concurrent_queries: usize,
    /// Maximum wall-clock duration a single query may run.
    pub max_query_duration: Duration,
    /// Maximum rows a single query may process.
    pub max_query_rows: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_concurrent_queries: 1,
            max_query_duration: Duration::from_secs(60),
            max_query_rows: 10_000_000,
        }
    }
}

/// Circuit breaker admission-control thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive dispatch failures before the breaker opens.
    pub failure_threshold: u32,
    /// Window over which consecutive failures are counted.
    pub failure_window: Duration,
    /// How long the breaker stays open before probing with Half-Open.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(10),
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Archive pack/unpack defaults.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Maximum total size of a packed archive.
    pub max_archive_size_bytes: u64,
    /// File extensions excluded from a pack when `exclude_data` is set.
    pub data_extensions: Vec<String>,
    /// Path prefixes always skipped while walking the project tree.
    pub excluded_dir_names: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            max_archive_size_bytes: 1024 * 1024 * 1024,
            data_extensions: vec!["parquet".to_owned(), "avro".to_owned(), "orc".to_owned()],
            excluded_dir_names: vec![
                "target".to_owned(),
                "node_modules".to_owned(),
                ".git".to_owned(),
                "build".to_owned(),
                "dist".to_owned(),
            ],
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Native binary endpoint configuration.
    pub native: EndpointConfig,
    /// PostgreSQL-compatible endpoint configuration.
    pub postgres: EndpointConfig,
    /// HTTP status/health endpoint configuration.
    pub http: EndpointConfig,
    /// Maximum concurrently tracked connections across all endpoints.
    pub max_connections: usize,
    /// How long a connection may sit Idle before the pool reaps it.
    pub idle_timeout: Duration,
    /// Deadline applied to each read poll; re-armed every iteration so
    /// shutdown is observed promptly.
    pub read_deadline: Duration,
    /// Whether authentication is required; when `false` every connection is
    /// auto-admitted as the default principal.
    pub auth_enabled: bool,
    /// Per-connection and per-query resource caps.
    pub resource_limits: ResourceLimits,
    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Archive pack/unpack defaults.
    pub archive: ArchiveConfig,
    /// Ceiling on a single signal's serialized payload size.
    pub max_payload_bytes: u32,
    /// Upper bound on the grace period the supervisor waits for in-flight
    /// connections to drain on shutdown.
    pub shutdown_grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            native: EndpointConfig::new(true, 9000),
            postgres: EndpointConfig::new(true, 5433),
            http: EndpointConfig::new(true, 8123),
            max_connections: 1024,
            idle_timeout: Duration::from_secs(600),
            read_deadline: Duration::from_millis(100),
            auth_enabled: true,
            resource_limits: ResourceLimits::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            archive: ArchiveConfig::default(),
            max_payload_bytes: 64 * 1024 * 1024,
            shutdown_grace_period: Duration::from_secs(30),
        }
    }
}
