use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::types::{QueryKey, QueryKeySource, QueryObserverOptions, QueryOptions};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Client-wide defaults applied to every query the client observes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryClientConfig {
    /// How long fetched data stays fresh, in milliseconds.
    pub stale_time_ms: u64,
    /// How long unobserved data is kept, in milliseconds.
    pub gc_time_ms: u64,
    /// Retries after a failed fetch.
    pub retry: u32,
    /// Retries after a failed mutation.
    pub mutation_retry: u32,
    /// First retry delay in milliseconds; doubles per attempt up to 30 s.
    pub retry_delay_ms: u64,
    pub enabled: bool,
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 0,
            gc_time_ms: 5 * 60 * 1000,
            retry: 3,
            mutation_retry: 0,
            retry_delay_ms: 1000,
            enabled: true,
        }
    }
}

impl QueryClientConfig {
    pub fn from_toml_str(s: &str) -> SyncResult<Self> {
        toml::from_str(s).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_millis(self.gc_time_ms)
    }

    /// Delay before retry number `attempt` (starting at 1).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
    }

    /// Fill every unset field of `options` from these defaults.
    ///
    /// A dynamic key source defaults to the empty key; the binding
    /// evaluates the key function before any observer sees the options.
    pub fn apply(&self, options: &QueryOptions) -> QueryObserverOptions {
        let query_key = match &options.query_key {
            QueryKeySource::Static(key) => key.clone(),
            QueryKeySource::Dynamic(_) => QueryKey::default(),
        };
        QueryObserverOptions {
            query_hash: query_key.hash(),
            query_key,
            query_fn: options.query_fn.clone(),
            enabled: options.enabled.unwrap_or(self.enabled),
            stale_time: options.stale_time.unwrap_or_else(|| self.stale_time()),
            gc_time: options.gc_time.unwrap_or_else(|| self.gc_time()),
            retry: options.retry.unwrap_or(self.retry),
        }
    }
}
