//! Runtime configuration, built once in `main` and handed to each component.

use std::path::PathBuf;
use std::time::Duration;

use crate::metadata::DEFAULT_LABEL_NAMESPACE;

/// Default registry base URL.
pub const DEFAULT_REGISTRY_URL: &str = "http://docker-registry:5000";

/// Default data directory for the catalog database.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/mvirt/appstore";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `catalog.db`.
    pub data_dir: PathBuf,
    pub registry: RegistryConfig,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            registry: RegistryConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// How to reach the container registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL without trailing slash, e.g. `http://docker-registry:5000`.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Label namespace installer metadata lives under.
    pub label_namespace: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REGISTRY_URL.to_string(),
            timeout: Duration::from_secs(10),
            label_namespace: DEFAULT_LABEL_NAMESPACE.to_string(),
        }
    }
}

/// Bounded exponential backoff for metadata fetches after a push event.
///
/// The registry can announce a push before the manifest is readable, so the
/// first attempts may fail transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based: the wait after the
    /// first failure is `backoff(1)`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
