use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::ACCEPT;
use reqwest::header::ACCEPT_LANGUAGE;
use reqwest::Client;
use reqwest::StatusCode;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::AppointmentSlot;
use super::CalendarFetcher;
use super::FetchOutcome;
use super::SiteAdapter;
use crate::constants::ACCEPT_HTML;
use crate::constants::DIRECT_ROUTE;
use crate::constants::REQUESTER_EMAIL_HEADER;
use crate::constants::REQUESTER_ID_HEADER;
use crate::metrics::FETCH_LATENCY_MS;
use crate::Error;
use crate::FetchConfig;
use crate::ProxyEndpoint;
use crate::RequesterIdentity;
use crate::Result;
use crate::WatchTarget;

/// Fetches calendar pages over HTTP(S) with one client per route and location.
///
/// The second calendar page carries no location and relies on the session
/// cookie set by the first, so locations never share a cookie jar. Clients
/// are built on first use and cached; cycles of one location are sequential.
pub struct HttpCalendarFetcher {
    target: Arc<WatchTarget>,
    adapter: Arc<dyn SiteAdapter>,
    settings: FetchConfig,
    /// Keyed by (route, location); the route is the proxy address or "direct"
    clients: DashMap<(String, String), Client>,
}

impl HttpCalendarFetcher {
    pub fn new(
        target: Arc<WatchTarget>,
        adapter: Arc<dyn SiteAdapter>,
        settings: FetchConfig,
    ) -> Result<Self> {
        // surface invalid client settings at startup rather than on first poll
        build_client(&settings, None)?;
        Ok(Self {
            target,
            adapter,
            settings,
            clients: DashMap::new(),
        })
    }

    fn client_for(
        &self,
        proxy: Option<&ProxyEndpoint>,
        location: &str,
    ) -> Result<Client> {
        let route = proxy.map_or(DIRECT_ROUTE, |p| p.address.as_str());
        let key = (route.to_string(), location.to_string());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.value().clone());
        }
        let client = build_client(&self.settings, proxy)?;
        trace!(%location, route = %redacted_route(proxy), "new http client");
        Ok(self.clients.entry(key).or_insert(client).value().clone())
    }

    async fn fetch_pages(
        &self,
        location: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> FetchOutcome {
        let urls = match self.adapter.page_urls(&self.target, location, Utc::now()) {
            Ok(urls) => urls,
            Err(e) => return FetchOutcome::FatalError(e.to_string()),
        };
        let client = match self.client_for(proxy, location) {
            Ok(client) => client,
            Err(e) => return FetchOutcome::FatalError(format!("cannot build client: {e}")),
        };
        let identity = proxy
            .and_then(|p| p.identity.as_ref())
            .unwrap_or(&self.target.identity);

        let mut merged = Vec::new();
        for url in urls {
            trace!(%location, %url, "GET");
            let response = match client
                .get(&url)
                .headers(identity_headers(identity))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => return classify_transport_error(&e),
            };
            let status = response.status();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => return classify_transport_error(&e),
            };

            match classify_response(status, &body, self.adapter.as_ref(), location) {
                FetchOutcome::Slots(slots) => merged.extend(slots),
                FetchOutcome::Empty => {}
                other => {
                    debug!(%location, %url, %status, "page classified as {}", other.kind());
                    return other;
                }
            }
        }

        merge_slots(merged)
    }
}

#[async_trait]
impl CalendarFetcher for HttpCalendarFetcher {
    async fn fetch(
        &self,
        location: &str,
        proxy: Option<ProxyEndpoint>,
    ) -> FetchOutcome {
        let started = Instant::now();
        let outcome = match timeout(
            self.settings.request_timeout(),
            self.fetch_pages(location, proxy.as_ref()),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::TransientError("timeout".into()),
        };
        FETCH_LATENCY_MS
            .with_label_values(&[location])
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        outcome
    }
}

fn redacted_route(proxy: Option<&ProxyEndpoint>) -> String {
    proxy.map_or_else(|| DIRECT_ROUTE.to_string(), |p| p.redacted_address())
}

/// Maps one HTTP response to an outcome
pub fn classify_response(
    status: StatusCode,
    body: &str,
    adapter: &dyn SiteAdapter,
    location: &str,
) -> FetchOutcome {
    if status.is_success() {
        if adapter.is_blocked(body) {
            return FetchOutcome::Blocked;
        }
        return match adapter.parse(location, body) {
            Ok(slots) if slots.is_empty() => FetchOutcome::Empty,
            Ok(slots) => FetchOutcome::Slots(slots),
            Err(e) => FetchOutcome::FatalError(e.to_string()),
        };
    }

    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => FetchOutcome::Blocked,
        StatusCode::REQUEST_TIMEOUT => FetchOutcome::TransientError(format!("status {status}")),
        s if s.is_server_error() => FetchOutcome::TransientError(format!("status {status}")),
        _ => FetchOutcome::FatalError(format!("unexpected status {status}")),
    }
}

fn classify_transport_error(e: &reqwest::Error) -> FetchOutcome {
    if e.is_builder() {
        FetchOutcome::FatalError(format!("invalid request: {e}"))
    } else if e.is_timeout() {
        FetchOutcome::TransientError("timeout".into())
    } else if e.is_connect() {
        FetchOutcome::TransientError(format!("connect: {e}"))
    } else {
        FetchOutcome::TransientError(e.to_string())
    }
}

/// Deduplicates by slot id and orders by date
pub(crate) fn merge_slots(mut slots: Vec<AppointmentSlot>) -> FetchOutcome {
    let mut seen = HashSet::new();
    slots.retain(|slot| seen.insert(slot.slot_id.clone()));
    slots.sort_by(|a, b| (a.date_time, &a.slot_id).cmp(&(b.date_time, &b.slot_id)));

    if slots.is_empty() {
        FetchOutcome::Empty
    } else {
        FetchOutcome::Slots(slots)
    }
}

fn identity_headers(identity: &RequesterIdentity) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let fields = [
        (REQUESTER_EMAIL_HEADER, identity.email.as_deref()),
        (REQUESTER_ID_HEADER, identity.tool_id.as_deref()),
    ];
    for (name, value) in fields {
        let Some(value) = value else { continue };
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(e) => warn!("skipping {} header: {}", name, e),
        }
    }
    headers
}

fn build_client(
    settings: &FetchConfig,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&settings.accept_language)
            .map_err(|e| Error::InvalidConfig(format!("fetch.accept_language: {e}")))?,
    );
    headers.insert("dnt", HeaderValue::from_static("1"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));

    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .default_headers(headers)
        .cookie_store(true)
        .timeout(settings.request_timeout());

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(&proxy.address)?);
    }

    Ok(builder.build()?)
}
