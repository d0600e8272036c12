//! A builder for assembling a runnable [`WatchSession`].
//!
//! [`WatchSessionBuilder`] wires the proxy pool, slot registry, notification
//! hub, calendar fetcher and scheduler from one [`WatchConfig`].
//!
//! ## Key Design Points
//! - **Default Components**: HTTP fetching through the site adapter selected by `fetch.site`,
//!   proxies from `proxy.proxies_file`, fatal errors reported to the log.
//! - **Customization**: Any of them can be replaced via setter methods (e.g. `fetcher()`,
//!   `site_adapter()`), which is how tests drive a session without network access.
//! - **Lifecycle Management**: `build()` validates the configuration and assembles the session;
//!   nothing runs until [`WatchSession::run`] is awaited.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let session = WatchSessionBuilder::new(config, shutdown_rx)
//!     .fatal_reporter(Arc::new(MyPager))  // Optional override
//!     .build()?;
//! session.run().await?;
//! ```
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing::warn;

use super::WatchSession;
use crate::BerlinServiceAdapter;
use crate::CalendarFetcher;
use crate::FatalReporter;
use crate::HttpCalendarFetcher;
use crate::LogFatalReporter;
use crate::NotificationHub;
use crate::ProxyPolicy;
use crate::ProxyPool;
use crate::Result;
use crate::SiteAdapter;
use crate::SiteKind;
use crate::SlotRegistry;
use crate::WatchConfig;
use crate::WatchScheduler;

pub struct WatchSessionBuilder {
    pub(super) config: WatchConfig,
    pub(super) fetcher: Option<Arc<dyn CalendarFetcher>>,
    pub(super) site_adapter: Option<Arc<dyn SiteAdapter>>,
    pub(super) fatal_reporter: Option<Arc<dyn FatalReporter>>,
    pub(super) proxy_pool: Option<Arc<ProxyPool>>,
    pub(super) shutdown_signal: watch::Receiver<()>,
}

impl WatchSessionBuilder {
    /// Creates a builder over an already loaded configuration
    ///
    /// # Arguments
    /// * `config` - Session configuration; validated again by `build()`
    /// * `shutdown_signal` - Watch channel for graceful shutdown signaling
    pub fn new(
        config: WatchConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            fetcher: None,
            site_adapter: None,
            fatal_reporter: None,
            proxy_pool: None,
            shutdown_signal,
        }
    }

    /// Replaces the HTTP fetcher entirely; `site_adapter` is then unused
    pub fn fetcher(
        mut self,
        fetcher: Arc<dyn CalendarFetcher>,
    ) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the adapter used by the default HTTP fetcher
    pub fn site_adapter(
        mut self,
        site_adapter: Arc<dyn SiteAdapter>,
    ) -> Self {
        self.site_adapter = Some(site_adapter);
        self
    }

    pub fn fatal_reporter(
        mut self,
        fatal_reporter: Arc<dyn FatalReporter>,
    ) -> Self {
        self.fatal_reporter = Some(fatal_reporter);
        self
    }

    /// Uses `proxy_pool` instead of loading `proxy.proxies_file`
    pub fn proxy_pool(
        mut self,
        proxy_pool: Arc<ProxyPool>,
    ) -> Self {
        self.proxy_pool = Some(proxy_pool);
        self
    }

    /// Replaces the entire session configuration
    pub fn config(
        mut self,
        config: WatchConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Finalizes the builder and assembles the session.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` when the configuration fails validation
    /// - `Error::ProxyFile` when the proxy file exists but cannot be parsed
    /// - `Error::Http` when the default HTTP client cannot be built
    pub fn build(self) -> Result<WatchSession> {
        let config = self.config.validate()?;
        let target = Arc::new(config.target.to_watch_target());

        let proxies = match self.proxy_pool {
            Some(pool) => pool,
            None => Arc::new(load_proxy_pool(&config)?),
        };

        let registry = Arc::new(SlotRegistry::with_timezone(
            config.registry.vanish_after_misses,
            config.fetch.site.timezone(),
        ));
        let hub = NotificationHub::new(config.hub.subscriber_buffer_size);

        let fetcher: Arc<dyn CalendarFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let adapter = self
                    .site_adapter
                    .unwrap_or_else(|| default_site_adapter(config.fetch.site));
                Arc::new(HttpCalendarFetcher::new(
                    target.clone(),
                    adapter,
                    config.fetch.clone(),
                )?)
            }
        };

        let fatal_reporter = self
            .fatal_reporter
            .unwrap_or_else(|| Arc::new(LogFatalReporter));

        let scheduler = Arc::new(WatchScheduler::new(
            &config,
            target,
            fetcher,
            proxies.clone(),
            registry.clone(),
            hub.clone(),
            fatal_reporter,
        ));

        Ok(WatchSession {
            config: Arc::new(config),
            scheduler,
            hub,
            registry,
            proxies,
            shutdown_signal: self.shutdown_signal,
        })
    }
}

fn load_proxy_pool(config: &WatchConfig) -> Result<ProxyPool> {
    let policy = ProxyPolicy::from_config(&config.proxy, &config.retry);
    let Some(path) = &config.proxy.proxies_file else {
        info!("no proxy file configured, fetching directly");
        return Ok(ProxyPool::new(Vec::new(), policy));
    };

    let pool = ProxyPool::from_file(path, policy)?;
    if pool.is_empty() {
        warn!("proxy file {} yields no proxies, fetching directly", path.display());
    } else {
        info!("loaded {} proxies from {}", pool.len(), path.display());
    }
    Ok(pool)
}

fn default_site_adapter(site: SiteKind) -> Arc<dyn SiteAdapter> {
    match site {
        SiteKind::Berlin => Arc::new(BerlinServiceAdapter::new()),
    }
}
