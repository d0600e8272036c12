use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Polling cadence and concurrency of the watch loop
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Base delay between two polls of the same location
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lower bound applied after scaling the interval by the proxy count
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,

    /// Upper bound of the random delay added to every idle wait
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Maximum number of fetches in flight across all locations
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Fetch without a proxy when every proxy is cooling down
    #[serde(default)]
    pub allow_direct_fallback: bool,

    /// Pause before retrying proxy selection when the pool is exhausted
    #[serde(default = "default_proxy_exhausted_pause_ms")]
    pub proxy_exhausted_pause_ms: u64,

    /// Divide the poll interval by the number of configured proxies
    #[serde(default)]
    pub scale_interval_by_proxies: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            min_poll_interval_ms: default_min_poll_interval_ms(),
            jitter_ms: default_jitter_ms(),
            max_concurrency: default_max_concurrency(),
            allow_direct_fallback: false,
            proxy_exhausted_pause_ms: default_proxy_exhausted_pause_ms(),
            scale_interval_by_proxies: false,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("scheduler.poll_interval_ms must be > 0".into()));
        }
        if self.min_poll_interval_ms > self.poll_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "scheduler.min_poll_interval_ms ({}) exceeds poll_interval_ms ({})",
                self.min_poll_interval_ms, self.poll_interval_ms
            )));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidConfig("scheduler.max_concurrency must be > 0".into()));
        }
        if self.proxy_exhausted_pause_ms == 0 {
            return Err(Error::InvalidConfig(
                "scheduler.proxy_exhausted_pause_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Effective base interval for a pool of `proxy_count` endpoints
    pub fn effective_poll_interval(
        &self,
        proxy_count: usize,
    ) -> Duration {
        let base = self.poll_interval_ms;
        let scaled = if self.scale_interval_by_proxies && proxy_count > 1 {
            (base / proxy_count as u64).max(self.min_poll_interval_ms)
        } else {
            base
        };
        Duration::from_millis(scaled)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn proxy_exhausted_pause(&self) -> Duration {
        Duration::from_millis(self.proxy_exhausted_pause_ms)
    }
}

// Berlin's appointment team asks for at most one request per three minutes.
fn default_poll_interval_ms() -> u64 {
    180_000
}
fn default_min_poll_interval_ms() -> u64 {
    10_000
}
fn default_jitter_ms() -> u64 {
    5_000
}
fn default_max_concurrency() -> usize {
    4
}
fn default_proxy_exhausted_pause_ms() -> u64 {
    5_000
}
