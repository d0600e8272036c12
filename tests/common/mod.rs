use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use slotwatch::AppointmentSlot;
use slotwatch::LocationStatus;
use slotwatch::PushMessage;
use slotwatch::WatchConfig;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use warp::http::StatusCode;
use warp::Filter;

pub const SERVICE_ID: &str = "120686";

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub const EMPTY_CALENDAR: &str = r#"<div class="calendar-month-table"><table><tr><td class="nichtbuchbar">1</td></tr></table></div>"#;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Calendar page with one bookable day per timestamp
pub fn calendar_page(timestamps: &[i64]) -> String {
    let cells: String = timestamps
        .iter()
        .map(|ts| {
            format!(
                r#"<td class="buchbar"><a href="/terminvereinbarung/termin/time/{ts}/" title="An diesem Tag einen Termin buchen">x</a></td>"#
            )
        })
        .collect();
    format!(r#"<div class="calendar-month-table"><table><tr>{cells}</tr></table></div>"#)
}

pub fn service_url(base: &str) -> String {
    format!("{base}/dienstleistung/{SERVICE_ID}/")
}

/// Whole-second timestamp `days` from now, as the site renders it
pub fn days_from_now(days: i64) -> DateTime<Utc> {
    let ts = (Utc::now() + chrono::Duration::days(days)).timestamp();
    DateTime::from_timestamp(ts, 0).unwrap()
}

pub fn session_config(base: &str) -> WatchConfig {
    let mut config = WatchConfig::default();
    config.target.service_url = service_url(base);
    config.target.email = Some("me@example.org".into());
    config.target.tool_id = Some("slotwatch-test".into());
    config.scheduler.poll_interval_ms = 100;
    config.scheduler.min_poll_interval_ms = 10;
    config.scheduler.jitter_ms = 0;
    config.fetch.request_timeout_ms = 2_000;
    config.hub.listen_address = "127.0.0.1:0".parse().unwrap();
    config
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub from: Option<String>,
    pub requester_id: Option<String>,
    pub user_agent: Option<String>,
    pub cookie: Option<String>,
}

struct SiteState {
    status: u16,
    body: String,
    delay: Duration,
    requests: Vec<RecordedRequest>,
}

/// Local stand-in for the appointment site.
///
/// The first calendar page (`/all/...` or `tag.php`) answers with the
/// configured status and body after the configured delay, and sets a
/// `slotwatch_location` session cookie naming the location it served. The
/// next-month `day` page is always an empty calendar.
#[derive(Clone)]
pub struct FakeSite {
    pub addr: SocketAddr,
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(SiteState {
            status: 200,
            body: EMPTY_CALENDAR.to_string(),
            delay: Duration::ZERO,
            requests: Vec::new(),
        }));

        let handler_state = state.clone();
        let route = warp::get()
            .and(warp::path::full())
            .and(warp::query::<HashMap<String, String>>())
            .and(warp::header::optional::<String>("from"))
            .and(warp::header::optional::<String>("x-requester-id"))
            .and(warp::header::optional::<String>("user-agent"))
            .and(warp::header::optional::<String>("cookie"))
            .and_then(
                move |path: warp::path::FullPath,
                      query: HashMap<String, String>,
                      from: Option<String>,
                      requester_id: Option<String>,
                      user_agent: Option<String>,
                      cookie: Option<String>| {
                    let state = handler_state.clone();
                    async move {
                        let (status, body, set_cookie, delay) = {
                            let mut state = state.lock();
                            state.requests.push(RecordedRequest {
                                path: path.as_str().to_string(),
                                from,
                                requester_id,
                                user_agent,
                                cookie,
                            });
                            if path.as_str().contains("/termin/day/") {
                                (200, EMPTY_CALENDAR.to_string(), None, Duration::ZERO)
                            } else {
                                let location = query
                                    .get("dienstleisterlist")
                                    .cloned()
                                    .unwrap_or_else(|| "all".to_string());
                                (
                                    state.status,
                                    state.body.clone(),
                                    Some(format!("slotwatch_location={location}; Path=/")),
                                    state.delay,
                                )
                            }
                        };
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }

                        let mut response = warp::http::Response::builder()
                            .status(StatusCode::from_u16(status).unwrap())
                            .header("content-type", "text/html; charset=utf-8");
                        if let Some(set_cookie) = set_cookie {
                            response = response.header("set-cookie", set_cookie);
                        }
                        Ok::<_, warp::Rejection>(response.body(body).unwrap())
                    }
                },
            );

        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn respond_with(
        &self,
        status: u16,
        body: impl Into<String>,
    ) {
        let mut state = self.state.lock();
        state.status = status;
        state.body = body.into();
    }

    /// Holds every first-page response back by `delay`
    pub fn set_delay(
        &self,
        delay: Duration,
    ) {
        self.state.lock().delay = delay;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    client
}

/// Next text frame decoded as a push message; panics on timeout or any other frame
pub async fn next_message(client: &mut WsClient) -> PushMessage {
    let message = tokio::time::timeout(WAIT_TIMEOUT, client.next())
        .await
        .expect("timed out waiting for a push message")
        .expect("push stream ended")
        .unwrap();
    match message {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected frame {other:?}"),
    }
}

/// Next slot frame, skipping status updates
pub async fn next_slot(client: &mut WsClient) -> AppointmentSlot {
    loop {
        if let PushMessage::Slot(slot) = next_message(client).await {
            return slot;
        }
    }
}

/// Next status frame, skipping slots
pub async fn next_status(client: &mut WsClient) -> LocationStatus {
    loop {
        if let PushMessage::Status(status) = next_message(client).await {
            return status;
        }
    }
}
