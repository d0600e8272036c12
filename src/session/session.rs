//! A runnable watch session.
//!
//! ## Key Responsibilities
//! - Serves the push channel and, when enabled, the Prometheus endpoint
//! - Drives the [`WatchScheduler`] until the shutdown signal fires
//! - Closes the [`NotificationHub`] once polling has stopped
//!
//! ## Example Usage
//! ```ignore
//! let session = WatchSessionBuilder::new(config, shutdown_rx).build()?;
//! session.run().await?;
//! ```
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::info;

use crate::metrics;
use crate::utils::async_task::spawn_task;
use crate::NotificationHub;
use crate::ProxyPool;
use crate::PushServer;
use crate::Result;
use crate::SlotRegistry;
use crate::WatchConfig;
use crate::WatchScheduler;

pub struct WatchSession {
    pub(super) config: Arc<WatchConfig>,
    pub(super) scheduler: Arc<WatchScheduler>,
    pub(super) hub: NotificationHub,
    pub(super) registry: Arc<SlotRegistry>,
    pub(super) proxies: Arc<ProxyPool>,
    pub(super) shutdown_signal: watch::Receiver<()>,
}

impl WatchSession {
    /// Binds the push channel on `hub.listen_address` and runs until shutdown.
    ///
    /// # Errors
    /// `Error::Server` when the push channel address cannot be bound.
    pub async fn run(self) -> Result<()> {
        let push_server = self.bind_push_server(self.config.hub.listen_address).await?;
        self.run_with_push_server(push_server).await
    }

    /// Runs with a push server bound by the caller
    pub async fn run_with_push_server(
        self,
        push_server: PushServer,
    ) -> Result<()> {
        let mut handles = Vec::new();

        if self.config.monitoring.prometheus_enabled {
            let port = self.config.monitoring.prometheus_port;
            let shutdown = self.shutdown_signal.clone();
            spawn_task(
                "metrics-server",
                move || async move {
                    metrics::start_server(port, shutdown).await;
                    Ok(())
                },
                Some(&mut handles),
            );
        }

        let shutdown = self.shutdown_signal.clone();
        spawn_task("push-server", move || push_server.run(shutdown), Some(&mut handles));

        let result = self.scheduler.clone().run(self.shutdown_signal.clone()).await;

        self.hub.close();
        join_all(handles).await;
        info!("watch session stopped");
        result
    }

    /// Binds a push server for this session's hub, e.g. on port 0 to learn the address first
    pub async fn bind_push_server(
        &self,
        address: SocketAddr,
    ) -> Result<PushServer> {
        PushServer::bind(
            address,
            self.hub.clone(),
            self.registry.clone(),
            self.config.hub.replay_on_connect,
        )
        .await
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn scheduler(&self) -> Arc<WatchScheduler> {
        self.scheduler.clone()
    }

    pub fn hub(&self) -> NotificationHub {
        self.hub.clone()
    }

    pub fn registry(&self) -> Arc<SlotRegistry> {
        self.registry.clone()
    }

    pub fn proxies(&self) -> Arc<ProxyPool> {
        self.proxies.clone()
    }
}
