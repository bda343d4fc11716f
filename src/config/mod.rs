/// Configuration management for the holdingpen engine
///
/// Handles server configuration, database location, worker pool sizing, lock leases,
/// task timeouts and the endpoints of external collaborators.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Continuation scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Task execution limits
    pub tasks: TaskConfig,
    /// External collaborator endpoints
    pub services: ServicesConfig,
    /// Pending-record cache and periodic report settings
    pub cache: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for the object store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding holdingpen.db (default: "data")
    pub data_dir: String,
}

/// Worker pool and advisory lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of continuation workers consuming the queue
    pub workers: usize,
    /// Lease duration of an advisory object lock
    pub lock_ttl_secs: u64,
    /// Requeue attempts before a contended request is dropped
    pub max_requeue_attempts: u32,
    /// Base delay of the exponential requeue backoff
    pub requeue_backoff_ms: u64,
    /// Upper bound of a single requeue delay
    pub max_backoff_ms: u64,
}

/// Task execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Default timeout for tasks that run out-of-process work
    pub out_of_process_timeout_secs: u64,
}

/// Endpoints of the classifier, legacy upload and operator channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Relevance classifier endpoint; None disables classification
    pub classifier_url: Option<String>,
    /// Legacy upload endpoint; None logs uploads instead of sending them
    pub publisher_url: Option<String>,
    /// Callback URL handed to the legacy system with every upload
    pub callback_base_url: String,
}

/// Pending-record cache and report scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a recid -> object id association stays valid
    pub pending_ttl_secs: u64,
    /// Cron expression for the error-chain report job (seconds resolution)
    pub report_schedule: String,
}

impl Config {
    /// Default configuration with in-memory friendly values, used by tests
    pub fn for_tests() -> Self {
        let mut config = Self::default();
        config.scheduler.workers = 2;
        config.scheduler.requeue_backoff_ms = 5;
        config.scheduler.max_backoff_ms = 50;
        config.tasks.out_of_process_timeout_secs = 5;
        config.services.classifier_url = None;
        config.services.publisher_url = None;
        config
    }

    /// Reject settings the scheduler cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.lock_ttl_secs <= self.tasks.out_of_process_timeout_secs {
            bail!(
                "lock ttl ({}s) must exceed the out-of-process task timeout ({}s)",
                self.scheduler.lock_ttl_secs,
                self.tasks.out_of_process_timeout_secs
            );
        }
        if self.scheduler.requeue_backoff_ms > self.scheduler.max_backoff_ms {
            bail!(
                "requeue backoff ({}ms) exceeds its cap ({}ms)",
                self.scheduler.requeue_backoff_ms,
                self.scheduler.max_backoff_ms
            );
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.scheduler.lock_ttl_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.tasks.out_of_process_timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.pending_ttl_secs)
    }

    /// Delay before the given requeue attempt, doubling from the base and capped
    pub fn requeue_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let delay = self.scheduler.requeue_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.scheduler.max_backoff_ms))
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("HOLDINGPEN_HOST", "0.0.0.0"),
                port: env_parse("HOLDINGPEN_PORT", 3005),
            },
            database: DatabaseConfig {
                data_dir: env_or("HOLDINGPEN_DATA_DIR", "data"),
            },
            scheduler: SchedulerConfig {
                workers: env_parse("HOLDINGPEN_WORKERS", 4),
                lock_ttl_secs: env_parse("HOLDINGPEN_LOCK_TTL_SECS", 900),
                max_requeue_attempts: env_parse("HOLDINGPEN_MAX_REQUEUE", 8),
                requeue_backoff_ms: env_parse("HOLDINGPEN_REQUEUE_BACKOFF_MS", 250),
                max_backoff_ms: env_parse("HOLDINGPEN_MAX_BACKOFF_MS", 30_000),
            },
            tasks: TaskConfig {
                out_of_process_timeout_secs: env_parse("HOLDINGPEN_TASK_TIMEOUT_SECS", 600),
            },
            services: ServicesConfig {
                classifier_url: std::env::var("HOLDINGPEN_CLASSIFIER_URL").ok(),
                publisher_url: std::env::var("HOLDINGPEN_PUBLISHER_URL").ok(),
                callback_base_url: env_or("HOLDINGPEN_CALLBACK_URL", "http://localhost:3005"),
            },
            cache: CacheConfig {
                pending_ttl_secs: env_parse("HOLDINGPEN_PENDING_TTL_SECS", 86_400),
                report_schedule: env_or("HOLDINGPEN_REPORT_SCHEDULE", "0 0 */6 * * *"),
            },
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}
