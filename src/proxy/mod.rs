//! Outbound proxy rotation with health tracking.
//!
//! A [`ProxyPool`] hands out endpoints round-robin and skips the ones that
//! are cooling down after being blocked or failing repeatedly. Endpoints come
//! from a plain text file, see [`load_proxy_file`].
mod proxy_loader;
mod proxy_pool;
pub use proxy_loader::*;
pub use proxy_pool::*;


use std::time::Duration;

use crate::BackoffPolicy;
use crate::ProxyConfig;
use crate::RequesterIdentity;
use crate::RetryPolicies;

/// One outbound proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Position in the pool
    pub id: usize,
    /// Proxy URL, always with a scheme
    pub address: String,
    /// Identity to send on requests routed through this proxy
    pub identity: Option<RequesterIdentity>,
}

impl ProxyEndpoint {
    /// Address with any `user:password@` stripped, safe for logs and metric labels
    pub fn redacted_address(&self) -> String {
        let Ok(mut url) = url::Url::parse(&self.address) else {
            return format!("proxy-{}", self.id);
        };
        if url.username().is_empty() && url.password().is_none() {
            return self.address.clone();
        }
        // both only fail for cannot-be-a-base urls, which carry no credentials
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.to_string()
    }
}

/// Why a fetch through a proxy failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The site refused or throttled the request
    Blocked,
    /// Timeout, connection or server error
    Transient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Blocked => "blocked",
            FailureKind::Transient => "transient",
        }
    }
}

/// Health rules applied by the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPolicy {
    pub cooldown: BackoffPolicy,
    pub transient_failure_threshold: u32,
    pub min_reuse_interval: Option<Duration>,
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default(), &RetryPolicies::default())
    }
}

impl ProxyPolicy {
    pub fn from_config(
        proxy: &ProxyConfig,
        retry: &RetryPolicies,
    ) -> Self {
        Self {
            cooldown: retry.proxy_cooldown,
            transient_failure_threshold: proxy.transient_failure_threshold.max(1),
            min_reuse_interval: proxy.min_reuse_interval(),
        }
    }
}

/// Point-in-time view of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStatus {
    pub id: usize,
    /// Without credentials
    pub address: String,
    pub failed_count: u32,
    /// Remaining cooldown, `None` when available
    pub cooling_down_for: Option<Duration>,
}

impl ProxyStatus {
    pub fn is_available(&self) -> bool {
        self.cooling_down_for.is_none()
    }
}
