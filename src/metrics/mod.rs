//! Prometheus instrumentation for the watch engine.
//!
//! Collectors are created lazily and registered once into [`REGISTRY`]; the
//! optional warp server exposes them at `GET /metrics`.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref FETCH_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("slotwatch_fetch_outcomes_total", "Fetch results per location and outcome kind"),
        &["location", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref FETCH_LATENCY_MS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("slotwatch_fetch_latency_ms", "Histogram of calendar fetch latency in ms")
            .buckets(exponential_buckets(25.0, 2.0, 12).expect("valid bucket layout")),
        &["location"]
    )
    .expect("metric can not be created");

    pub static ref SLOTS_APPEARED: IntCounterVec = IntCounterVec::new(
        Opts::new("slotwatch_slots_appeared_total", "Newly appeared slots per location"),
        &["location"]
    )
    .expect("metric can not be created");

    pub static ref SLOTS_VANISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("slotwatch_slots_vanished_total", "Vanished slots per location"),
        &["location"]
    )
    .expect("metric can not be created");

    pub static ref PROXY_COOLDOWNS: IntCounterVec = IntCounterVec::new(
        Opts::new("slotwatch_proxy_cooldowns_total", "Proxy cooldowns per endpoint and reason"),
        &["proxy", "reason"]
    )
    .expect("metric can not be created");

    pub static ref CONNECTED_SUBSCRIBERS: IntGauge = IntGauge::new(
        "slotwatch_connected_subscribers",
        "Push-channel subscribers currently attached to the hub"
    )
    .expect("metric can not be created");

    pub static ref MISSED_NOTIFICATIONS: IntCounter = IntCounter::new(
        "slotwatch_missed_notifications_total",
        "Messages dropped from full subscriber queues"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers every collector into `registry`
pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(FETCH_OUTCOMES.clone()),
        Box::new(FETCH_LATENCY_MS.clone()),
        Box::new(SLOTS_APPEARED.clone()),
        Box::new(SLOTS_VANISHED.clone()),
        Box::new(PROXY_COOLDOWNS.clone()),
        Box::new(CONNECTED_SUBSCRIBERS.clone()),
        Box::new(MISSED_NOTIFICATIONS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("collector can not be registered: {}", e);
        }
    }
}

/// Registers the crate collectors into the global [`REGISTRY`] exactly once
pub fn init_metrics() {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));
}

/// Serves `GET /metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    init_metrics();

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!("metrics server listening on 0.0.0.0:{}", port);
    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text(&REGISTRY))
}

/// Encode every metric family of `registry` in the Prometheus text format
pub(crate) fn gather_text(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
