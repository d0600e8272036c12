use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// One proxy per line: `address[;email[;tool_id]]`. Unset means direct connection.
    #[serde(default)]
    pub proxies_file: Option<PathBuf>,

    /// Minimum time between two uses of the same proxy (0 disables)
    #[serde(default)]
    pub min_reuse_interval_ms: u64,

    /// Consecutive transient failures before a proxy is cooled down
    #[serde(default = "default_transient_failure_threshold")]
    pub transient_failure_threshold: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxies_file: None,
            min_reuse_interval_ms: 0,
            transient_failure_threshold: default_transient_failure_threshold(),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.transient_failure_threshold == 0 {
            return Err(Error::InvalidConfig(
                "proxy.transient_failure_threshold must be >= 1".into(),
            ));
        }
        if let Some(path) = &self.proxies_file {
            if path.as_os_str().is_empty() {
                return Err(Error::InvalidConfig("proxy.proxies_file path cannot be empty".into()));
            }
        }
        Ok(())
    }

    pub fn min_reuse_interval(&self) -> Option<Duration> {
        (self.min_reuse_interval_ms > 0).then(|| Duration::from_millis(self.min_reuse_interval_ms))
    }
}

fn default_transient_failure_threshold() -> u32 {
    3
}
