//! Polling loop of a watch session.
//!
//! Every location runs its own task that cycles through
//! `Idle -> Fetching -> {Processing, Backoff} -> Idle`. Cycles of one
//! location are strictly sequential; locations run concurrently, bounded by
//! a shared semaphore. A fatal fetch result suspends only its location until
//! [`WatchScheduler::resume`] is called.
//!
//! Whenever a location's health changes (recovered, backing off, suspended)
//! its [`LocationStatus`] is published through the hub next to the slots.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::CycleStep;
use super::FatalReporter;
use super::LocationCycle;
use super::LocationState;
use super::LocationStatus;
use crate::constants::DIRECT_ROUTE;
use crate::metrics::FETCH_OUTCOMES;
use crate::metrics::SLOTS_APPEARED;
use crate::metrics::SLOTS_VANISHED;
use crate::utils::async_task::spawn_task;
use crate::utils::backoff::random_jitter;
use crate::AppointmentSlot;
use crate::BackoffPolicy;
use crate::CalendarFetcher;
use crate::NotificationHub;
use crate::ProxyEndpoint;
use crate::ProxyPool;
use crate::Result;
use crate::SchedulerConfig;
use crate::SlotRegistry;
use crate::WatchConfig;
use crate::WatchTarget;

/// How a fetch is routed
#[derive(Debug)]
enum Route {
    Direct,
    Proxy(ProxyEndpoint),
    /// Every proxy is cooling down; retry after the pause
    Exhausted(Duration),
}

/// How one cycle ended
#[derive(Debug)]
enum CycleEnd {
    /// Next cycle after this delay
    Next(Duration),
    Suspended,
    Shutdown,
}

pub struct WatchScheduler {
    target: Arc<WatchTarget>,
    settings: SchedulerConfig,
    fetcher: Arc<dyn CalendarFetcher>,
    proxies: Arc<ProxyPool>,
    registry: Arc<SlotRegistry>,
    hub: NotificationHub,
    fatal_reporter: Arc<dyn FatalReporter>,
    permits: Arc<Semaphore>,
    cycles: DashMap<String, LocationCycle>,
    resume_signals: HashMap<String, Arc<Notify>>,
}

impl WatchScheduler {
    pub fn new(
        config: &WatchConfig,
        target: Arc<WatchTarget>,
        fetcher: Arc<dyn CalendarFetcher>,
        proxies: Arc<ProxyPool>,
        registry: Arc<SlotRegistry>,
        hub: NotificationHub,
        fatal_reporter: Arc<dyn FatalReporter>,
    ) -> Self {
        let location_backoff: BackoffPolicy = config.retry.location;
        let cycles = DashMap::new();
        let mut resume_signals = HashMap::new();
        for location in &target.locations {
            cycles.insert(location.clone(), LocationCycle::new(location.clone(), location_backoff));
            resume_signals.insert(location.clone(), Arc::new(Notify::new()));
        }

        Self {
            settings: config.scheduler.clone(),
            permits: Arc::new(Semaphore::new(config.scheduler.max_concurrency.max(1))),
            target,
            fetcher,
            proxies,
            registry,
            hub,
            fatal_reporter,
            cycles,
            resume_signals,
        }
    }

    /// Polls every location until `shutdown` fires.
    ///
    /// No new cycle starts after the signal; fetches already in flight run
    /// to completion or to their timeout.
    pub async fn run(
        self: Arc<Self>,
        shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!(
            "watching {} location(s) of {} through {} prox(y/ies)",
            self.target.locations.len(),
            self.target.service_url,
            self.proxies.len()
        );

        let mut handles = Vec::with_capacity(self.target.locations.len());
        for location in self.target.locations.clone() {
            let scheduler = self.clone();
            let shutdown = shutdown.clone();
            spawn_task(
                &format!("watch-{location}"),
                move || async move {
                    scheduler.watch_location(location, shutdown).await;
                    Ok(())
                },
                Some(&mut handles),
            );
        }

        join_all(handles).await;
        info!("watch scheduler stopped");
        Ok(())
    }

    /// Moves a suspended location back to polling
    pub fn resume(
        &self,
        location: &str,
    ) -> bool {
        let resumed = self
            .cycles
            .get_mut(location)
            .map(|mut cycle| cycle.resume())
            .unwrap_or(false);
        if resumed {
            if let Some(signal) = self.resume_signals.get(location) {
                signal.notify_one();
            }
            info!(%location, "location resumed");
        }
        resumed
    }

    /// Status of every location in watch order
    pub fn status(&self) -> Vec<LocationStatus> {
        self.target
            .locations
            .iter()
            .filter_map(|location| self.cycles.get(location).map(|cycle| cycle.status()))
            .collect()
    }

    async fn watch_location(
        &self,
        location: String,
        mut shutdown: watch::Receiver<()>,
    ) {
        // stagger first polls so locations do not fire together
        let mut delay = random_jitter(self.settings.jitter());

        loop {
            if !sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
            delay = match self.run_cycle(&location, &mut shutdown).await {
                CycleEnd::Next(next) => next,
                CycleEnd::Suspended => {
                    if !self.wait_for_resume(&location, &mut shutdown).await {
                        break;
                    }
                    random_jitter(self.settings.jitter())
                }
                CycleEnd::Shutdown => break,
            };
        }
        debug!(%location, "location task stopped");
    }

    async fn run_cycle(
        &self,
        location: &str,
        shutdown: &mut watch::Receiver<()>,
    ) -> CycleEnd {
        let started = self.with_cycle(location, |cycle| cycle.begin_fetch()).unwrap_or(false);
        if !started {
            return CycleEnd::Suspended;
        }

        let Some((permit, proxy)) = self.acquire_route(location, shutdown).await else {
            return CycleEnd::Shutdown;
        };
        let outcome = self.fetcher.fetch(location, proxy.clone()).await;
        drop(permit);

        FETCH_OUTCOMES
            .with_label_values(&[location, outcome.kind()])
            .inc();

        let Some(step) = self.with_cycle(location, |cycle| cycle.apply_outcome(outcome, Utc::now())) else {
            return CycleEnd::Shutdown;
        };

        match step {
            CycleStep::Process(slots) => {
                if let Some(proxy) = &proxy {
                    self.proxies.report_success(proxy);
                }
                self.process(location, slots);
                self.with_cycle(location, |cycle| cycle.finish_processing());
                self.report_status(location);
                let interval = self.settings.effective_poll_interval(self.proxies.len());
                CycleEnd::Next(interval + random_jitter(self.settings.jitter()))
            }
            CycleStep::Backoff { kind, delay } => {
                if let Some(proxy) = &proxy {
                    self.proxies.report_failure(proxy, kind);
                }
                let via = proxy
                    .as_ref()
                    .map_or_else(|| DIRECT_ROUTE.to_string(), |p| p.redacted_address());
                warn!(
                    %location,
                    %via,
                    "fetch failed ({}), backing off for {:?}",
                    kind.as_str(),
                    delay
                );
                self.report_status(location);
                if !sleep_or_shutdown(delay, shutdown).await {
                    return CycleEnd::Shutdown;
                }
                self.with_cycle(location, |cycle| cycle.finish_backoff());
                CycleEnd::Next(Duration::ZERO)
            }
            CycleStep::Suspend(reason) => {
                self.report_status(location);
                self.fatal_reporter.report_fatal(location, &reason).await;
                CycleEnd::Suspended
            }
        }
    }

    /// Waits for a concurrency permit and a route; `None` on shutdown
    async fn acquire_route(
        &self,
        location: &str,
        shutdown: &mut watch::Receiver<()>,
    ) -> Option<(OwnedSemaphorePermit, Option<ProxyEndpoint>)> {
        loop {
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => permit.ok()?,
                _ = shutdown.changed() => return None,
            };

            match self.select_route() {
                Route::Direct => return Some((permit, None)),
                Route::Proxy(proxy) => return Some((permit, Some(proxy))),
                Route::Exhausted(pause) => {
                    drop(permit);
                    debug!(%location, "all proxies cooling down, pausing {:?}", pause);
                    if !sleep_or_shutdown(pause, shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    fn select_route(&self) -> Route {
        if self.proxies.is_empty() {
            return Route::Direct;
        }
        if let Some(proxy) = self.proxies.next_proxy() {
            return Route::Proxy(proxy);
        }
        if self.settings.allow_direct_fallback {
            return Route::Direct;
        }
        let cap = self.settings.proxy_exhausted_pause();
        let pause = self
            .proxies
            .next_available_in()
            .map_or(cap, |wait| wait.min(cap))
            .max(Duration::from_millis(1));
        Route::Exhausted(pause)
    }

    fn process(
        &self,
        location: &str,
        observed: Vec<AppointmentSlot>,
    ) {
        let now = Utc::now();
        let evicted = self.registry.evict_expired(now);
        if evicted > 0 {
            debug!("evicted {} past slot(s)", evicted);
        }

        let upcoming: Vec<AppointmentSlot> = observed
            .into_iter()
            .filter(|slot| !self.registry.is_expired(slot, now))
            .collect();
        let diff = self.registry.apply(location, upcoming);

        for slot in &diff.newly_appeared {
            info!(%location, slot_id = %slot.slot_id, "new appointment slot at {}", slot.date_time);
            self.hub.publish(slot);
        }
        for slot in &diff.newly_vanished {
            debug!(%location, slot_id = %slot.slot_id, "slot at {} is gone", slot.date_time);
        }

        SLOTS_APPEARED
            .with_label_values(&[location])
            .inc_by(diff.newly_appeared.len() as u64);
        SLOTS_VANISHED
            .with_label_values(&[location])
            .inc_by(diff.newly_vanished.len() as u64);
    }

    /// Publishes the location's status when it changed since the last report
    fn report_status(
        &self,
        location: &str,
    ) {
        let Some(Some(status)) = self.with_cycle(location, |cycle| cycle.take_status_change()) else {
            return;
        };
        debug!(%location, state = %status.state, code = status.status, "location status changed");
        self.hub.publish_status(status);
    }

    async fn wait_for_resume(
        &self,
        location: &str,
        shutdown: &mut watch::Receiver<()>,
    ) -> bool {
        let Some(signal) = self.resume_signals.get(location) else {
            return false;
        };
        loop {
            tokio::select! {
                _ = signal.notified() => {}
                _ = shutdown.changed() => return false,
            }
            if self.with_cycle(location, |cycle| cycle.state()) != Some(LocationState::Suspended) {
                return true;
            }
        }
    }

    fn with_cycle<T>(
        &self,
        location: &str,
        f: impl FnOnce(&mut LocationCycle) -> T,
    ) -> Option<T> {
        self.cycles.get_mut(location).map(|mut cycle| f(cycle.value_mut()))
    }
}

/// Sleeps for `delay`; false when shutdown fired first
async fn sleep_or_shutdown(
    delay: Duration,
    shutdown: &mut watch::Receiver<()>,
) -> bool {
    if delay.is_zero() {
        return !shutdown.has_changed().unwrap_or(true);
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}
