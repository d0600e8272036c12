use std::sync::Arc;
use std::time::Duration;

use slotwatch::BerlinServiceAdapter;
use slotwatch::CalendarFetcher;
use slotwatch::FetchConfig;
use slotwatch::FetchOutcome;
use slotwatch::HttpCalendarFetcher;
use slotwatch::ProxyEndpoint;
use slotwatch::RequesterIdentity;
use slotwatch::WatchTarget;

use crate::common::calendar_page;
use crate::common::service_url;
use crate::common::FakeSite;

fn fetcher(site: &FakeSite) -> HttpCalendarFetcher {
    fetcher_with_timeout(site, 2_000)
}

fn fetcher_with_timeout(
    site: &FakeSite,
    request_timeout_ms: u64,
) -> HttpCalendarFetcher {
    let target = WatchTarget {
        service_url: service_url(&site.base_url()),
        identity: RequesterIdentity {
            tool_id: Some("slotwatch-test".into()),
            email: Some("me@example.org".into()),
        },
        locations: vec!["all".into()],
    };
    let settings = FetchConfig {
        request_timeout_ms,
        ..FetchConfig::default()
    };
    HttpCalendarFetcher::new(
        Arc::new(target),
        Arc::new(BerlinServiceAdapter::with_base_url(site.base_url())),
        settings,
    )
    .unwrap()
}

#[tokio::test]
async fn test_calendar_with_bookable_days_yields_slots() {
    let site = FakeSite::start().await;
    site.respond_with(200, calendar_page(&[1736845200, 1736758800, 1736758800]));

    let outcome = fetcher(&site).fetch("all", None).await;

    let FetchOutcome::Slots(slots) = outcome else {
        panic!("expected slots, got {outcome:?}");
    };
    let ids: Vec<&str> = slots.iter().map(|s| s.slot_id.as_str()).collect();
    assert_eq!(ids, vec!["1736758800", "1736845200"]);
    assert!(slots.iter().all(|s| s.location == "all"));
}

#[tokio::test]
async fn test_both_calendar_pages_are_requested_with_identity() {
    let site = FakeSite::start().await;

    let outcome = fetcher(&site).fetch("122210", None).await;

    assert_eq!(outcome, FetchOutcome::Empty);
    let requests = site.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].path, "/terminvereinbarung/termin/tag.php");
    assert!(requests[1].path.starts_with("/terminvereinbarung/termin/day/"));
    for request in &requests {
        assert_eq!(request.from.as_deref(), Some("me@example.org"));
        assert_eq!(request.requester_id.as_deref(), Some("slotwatch-test"));
        assert!(request.user_agent.as_deref().unwrap_or_default().contains("Firefox"));
    }
}

#[tokio::test]
async fn test_rate_limit_statuses_are_blocked() {
    let site = FakeSite::start().await;
    let fetcher = fetcher(&site);

    for status in [403, 429] {
        site.respond_with(status, "<html>nope</html>");
        assert_eq!(fetcher.fetch("all", None).await, FetchOutcome::Blocked, "status {status}");
    }
}

#[tokio::test]
async fn test_challenge_page_is_blocked() {
    let site = FakeSite::start().await;
    site.respond_with(200, "<html><body>Zu viele Zugriffe. Bitte versuchen Sie es später.</body></html>");

    assert_eq!(fetcher(&site).fetch("all", None).await, FetchOutcome::Blocked);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let site = FakeSite::start().await;
    site.respond_with(503, "maintenance");

    let outcome = fetcher(&site).fetch("all", None).await;

    assert!(matches!(outcome, FetchOutcome::TransientError(_)), "{outcome:?}");
    // the second page is not requested after a failed first page
    assert_eq!(site.requests().len(), 1);
}

#[tokio::test]
async fn test_not_found_and_garbage_are_fatal() {
    let site = FakeSite::start().await;
    let fetcher = fetcher(&site);

    site.respond_with(404, "gone");
    assert!(matches!(fetcher.fetch("all", None).await, FetchOutcome::FatalError(_)));

    site.respond_with(200, "<html><p>Wartungsarbeiten</p></html>");
    assert!(matches!(fetcher.fetch("all", None).await, FetchOutcome::FatalError(_)));
}

#[tokio::test]
async fn test_unreachable_proxy_is_transient() {
    let site = FakeSite::start().await;
    // bind and drop to get a port nobody listens on
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let proxy = ProxyEndpoint {
        id: 0,
        address: format!("http://{closed}"),
        identity: None,
    };

    let outcome = fetcher(&site).fetch("all", Some(proxy)).await;

    assert!(matches!(outcome, FetchOutcome::TransientError(_)), "{outcome:?}");
    assert!(site.requests().is_empty());
}

#[tokio::test]
async fn test_slow_site_times_out_as_transient() {
    let site = FakeSite::start().await;
    site.set_delay(Duration::from_secs(2));

    let started = std::time::Instant::now();
    let outcome = fetcher_with_timeout(&site, 300).fetch("all", None).await;

    assert_eq!(outcome, FetchOutcome::TransientError("timeout".into()));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_locations_keep_separate_session_cookies() {
    let site = FakeSite::start().await;
    let fetcher = fetcher(&site);

    for location in ["122210", "122217", "122210"] {
        assert_eq!(fetcher.fetch(location, None).await, FetchOutcome::Empty);
    }

    let cookies: Vec<Option<String>> = site.requests().into_iter().map(|r| r.cookie).collect();
    let cookie = |location: &str| Some(format!("slotwatch_location={location}"));
    assert_eq!(
        cookies,
        vec![
            // first visit of 122210: no session yet
            None,
            cookie("122210"),
            // 122217 never sees the session of 122210
            None,
            cookie("122217"),
            // back on 122210 with its own session
            cookie("122210"),
            cookie("122210"),
        ]
    );
}
