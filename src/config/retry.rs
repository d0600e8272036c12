use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::backoff::capped_exponential;
use crate::Error;
use crate::Result;

/// Capped exponential backoff template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `failures`-th consecutive failure: `min(base * 2^(failures-1), max)`
    pub fn delay_for(
        &self,
        failures: u32,
    ) -> Duration {
        capped_exponential(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            failures,
        )
    }

    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::InvalidConfig(format!("retry.{name}.base_delay_ms must be > 0")));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.{name}.max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Divide strategies by failure domain
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    // Location backoff after failed fetches
    #[serde(default = "default_location_policy")]
    pub location: BackoffPolicy,

    // Proxy cooldown after blocks and repeated transient failures
    #[serde(default = "default_proxy_cooldown_policy")]
    pub proxy_cooldown: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            location: default_location_policy(),
            proxy_cooldown: default_proxy_cooldown_policy(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.location.validate("location")?;
        self.proxy_cooldown.validate("proxy_cooldown")?;
        Ok(())
    }
}

fn default_location_policy() -> BackoffPolicy {
    BackoffPolicy {
        base_delay_ms: 30_000,
        max_delay_ms: 900_000,
    }
}
fn default_proxy_cooldown_policy() -> BackoffPolicy {
    BackoffPolicy {
        base_delay_ms: 180_000,
        max_delay_ms: 1_800_000,
    }
}
fn default_base_delay_ms() -> u64 {
    30_000
}
fn default_max_delay_ms() -> u64 {
    900_000
}
