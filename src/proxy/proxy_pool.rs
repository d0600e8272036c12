use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use super::load_proxy_file;
use super::FailureKind;
use super::ProxyEndpoint;
use super::ProxyPolicy;
use super::ProxyStatus;
use crate::metrics::PROXY_COOLDOWNS;
use crate::Result;

#[derive(Debug, Default, Clone)]
struct EndpointHealth {
    cooling_until: Option<Instant>,
    failed_count: u32,
    last_used: Option<Instant>,
}

impl EndpointHealth {
    /// Time left until the endpoint may be handed out again
    fn wait_time(
        &self,
        now: Instant,
        min_reuse_interval: Option<Duration>,
    ) -> Duration {
        let cooldown = self
            .cooling_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
        let reuse = match (min_reuse_interval, self.last_used) {
            (Some(min), Some(last)) => (last + min).saturating_duration_since(now),
            _ => Duration::ZERO,
        };
        cooldown.max(reuse)
    }
}

#[derive(Debug)]
struct PoolState {
    health: Vec<EndpointHealth>,
    cursor: usize,
}

/// Round-robin proxy rotation with health-based skipping.
///
/// Every operation takes the single state lock once, so reports from
/// concurrent location tasks are applied atomically per endpoint.
#[derive(Debug)]
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    policy: ProxyPolicy,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(
        endpoints: Vec<ProxyEndpoint>,
        policy: ProxyPolicy,
    ) -> Self {
        // ids double as indices into the health table
        let endpoints: Vec<ProxyEndpoint> = endpoints
            .into_iter()
            .enumerate()
            .map(|(id, endpoint)| ProxyEndpoint { id, ..endpoint })
            .collect();
        let health = vec![EndpointHealth::default(); endpoints.len()];

        Self {
            endpoints,
            policy,
            state: Mutex::new(PoolState { health, cursor: 0 }),
        }
    }

    /// Pool without proxies: every fetch goes out directly
    pub fn direct() -> Self {
        Self::new(Vec::new(), ProxyPolicy::default())
    }

    pub fn from_file(
        path: &Path,
        policy: ProxyPolicy,
    ) -> Result<Self> {
        Ok(Self::new(load_proxy_file(path)?, policy))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn policy(&self) -> &ProxyPolicy {
        &self.policy
    }

    /// Next selectable endpoint in round-robin order, marking it as used.
    ///
    /// Returns `None` when the pool is empty or every endpoint is cooling
    /// down or was used too recently.
    pub fn next_proxy(&self) -> Option<ProxyEndpoint> {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        for offset in 0..len {
            let idx = (state.cursor + offset) % len;
            let health = &mut state.health[idx];

            if let Some(until) = health.cooling_until {
                if now < until {
                    continue;
                }
                health.cooling_until = None;
            }
            if health.wait_time(now, self.policy.min_reuse_interval) > Duration::ZERO {
                continue;
            }

            health.last_used = Some(now);
            state.cursor = (idx + 1) % len;
            return Some(self.endpoints[idx].clone());
        }
        None
    }

    /// Clears the failure history of `endpoint`
    pub fn report_success(
        &self,
        endpoint: &ProxyEndpoint,
    ) {
        let Some(idx) = self.index_of(endpoint) else {
            return;
        };
        let mut state = self.state.lock();
        let health = &mut state.health[idx];
        health.failed_count = 0;
        health.cooling_until = None;
    }

    /// Records a failure and returns the cooldown it started, if any.
    ///
    /// `Blocked` always cools the endpoint down; `Transient` only once the
    /// consecutive failure count reaches the configured threshold.
    pub fn report_failure(
        &self,
        endpoint: &ProxyEndpoint,
        kind: FailureKind,
    ) -> Option<Duration> {
        let idx = self.index_of(endpoint)?;
        let now = Instant::now();

        let mut state = self.state.lock();
        let health = &mut state.health[idx];
        health.failed_count = health.failed_count.saturating_add(1);

        let cooldown = match kind {
            FailureKind::Blocked => Some(self.policy.cooldown.delay_for(health.failed_count)),
            FailureKind::Transient => {
                let threshold = self.policy.transient_failure_threshold;
                (health.failed_count >= threshold)
                    .then(|| self.policy.cooldown.delay_for(health.failed_count - threshold + 1))
            }
        }?;

        let until = now + cooldown;
        // a shorter cooldown never cuts a running one short
        health.cooling_until = Some(health.cooling_until.map_or(until, |current| current.max(until)));
        let failed_count = health.failed_count;
        drop(state);

        let address = endpoint.redacted_address();
        PROXY_COOLDOWNS
            .with_label_values(&[&address, kind.as_str()])
            .inc();
        debug!(
            "proxy {} cooling down for {:?} after {} consecutive failures ({})",
            address,
            cooldown,
            failed_count,
            kind.as_str()
        );
        Some(cooldown)
    }

    /// Number of endpoints `next_proxy` could hand out right now
    pub fn available_count(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .health
            .iter()
            .filter(|h| h.wait_time(now, self.policy.min_reuse_interval).is_zero())
            .count()
    }

    /// Time until the earliest endpoint becomes selectable; `None` for an empty pool
    pub fn next_available_in(&self) -> Option<Duration> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .health
            .iter()
            .map(|h| h.wait_time(now, self.policy.min_reuse_interval))
            .min()
    }

    pub fn snapshot(&self) -> Vec<ProxyStatus> {
        let now = Instant::now();
        let state = self.state.lock();
        self.endpoints
            .iter()
            .zip(state.health.iter())
            .map(|(endpoint, health)| ProxyStatus {
                id: endpoint.id,
                address: endpoint.redacted_address(),
                failed_count: health.failed_count,
                cooling_down_for: health
                    .cooling_until
                    .map(|until| until.saturating_duration_since(now))
                    .filter(|left| !left.is_zero()),
            })
            .collect()
    }

    fn index_of(
        &self,
        endpoint: &ProxyEndpoint,
    ) -> Option<usize> {
        match self.endpoints.get(endpoint.id) {
            Some(known) if known.address == endpoint.address => Some(endpoint.id),
            _ => {
                warn!("report for unknown proxy {}", endpoint.redacted_address());
                None
            }
        }
    }
}
