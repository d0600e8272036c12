use std::sync::Arc;

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use reqwest::StatusCode;

use super::*;
use crate::FetchConfig;
use crate::ParseFailure;
use crate::ProxyEndpoint;
use crate::RequesterIdentity;
use crate::WatchTarget;

/// Reads one slot per non-empty line as `<unix seconds>`; "garbage" fails
struct LineAdapter;

impl SiteAdapter for LineAdapter {
    fn page_urls(
        &self,
        _target: &WatchTarget,
        _location: &str,
        _now: DateTime<Utc>,
    ) -> Result<Vec<String>, ParseFailure> {
        Ok(vec![])
    }

    fn parse(
        &self,
        location: &str,
        raw: &str,
    ) -> Result<Vec<AppointmentSlot>, ParseFailure> {
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                let secs: i64 = l
                    .trim()
                    .parse()
                    .map_err(|_| ParseFailure::UnexpectedShape(l.to_string()))?;
                Ok(AppointmentSlot::new(
                    location,
                    Utc.timestamp_opt(secs, 0).unwrap(),
                    l.trim(),
                ))
            })
            .collect()
    }
}

fn slot(
    secs: i64,
    id: &str,
) -> AppointmentSlot {
    AppointmentSlot::new("L", Utc.timestamp_opt(secs, 0).unwrap(), id)
}

#[test]
fn classify_success_with_slots() {
    let outcome = classify_response(StatusCode::OK, "100\n200\n", &LineAdapter, "L");

    assert_eq!(outcome, FetchOutcome::Slots(vec![slot(100, "100"), slot(200, "200")]));
}

#[test]
fn classify_success_without_slots_is_empty() {
    assert_eq!(
        classify_response(StatusCode::OK, "", &LineAdapter, "L"),
        FetchOutcome::Empty
    );
}

#[test]
fn classify_success_with_block_signature_is_blocked() {
    assert_eq!(
        classify_response(StatusCode::OK, "Please solve this CAPTCHA", &LineAdapter, "L"),
        FetchOutcome::Blocked
    );
}

#[test]
fn classify_success_with_unparseable_body_is_fatal() {
    assert!(matches!(
        classify_response(StatusCode::OK, "<html>redesign</html>", &LineAdapter, "L"),
        FetchOutcome::FatalError(_)
    ));
}

#[test]
fn classify_throttling_statuses_as_blocked() {
    for status in [StatusCode::FORBIDDEN, StatusCode::TOO_MANY_REQUESTS] {
        assert_eq!(classify_response(status, "", &LineAdapter, "L"), FetchOutcome::Blocked);
    }
}

#[test]
fn classify_server_errors_as_transient() {
    for status in [
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::BAD_GATEWAY,
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::REQUEST_TIMEOUT,
    ] {
        assert!(matches!(
            classify_response(status, "", &LineAdapter, "L"),
            FetchOutcome::TransientError(_)
        ));
    }
}

#[test]
fn classify_other_statuses_as_fatal() {
    for status in [StatusCode::NOT_FOUND, StatusCode::GONE, StatusCode::BAD_REQUEST] {
        assert!(matches!(
            classify_response(status, "", &LineAdapter, "L"),
            FetchOutcome::FatalError(_)
        ));
    }
}

#[test]
fn merge_slots_should_dedupe_and_sort() {
    let merged = merge_slots(vec![slot(300, "300"), slot(100, "100"), slot(300, "300")]);

    assert_eq!(merged, FetchOutcome::Slots(vec![slot(100, "100"), slot(300, "300")]));
    assert_eq!(merge_slots(vec![]), FetchOutcome::Empty);
}

#[tokio::test]
async fn fetch_with_invalid_service_url_is_fatal() {
    let target = Arc::new(WatchTarget {
        service_url: "https://service.berlin.de/".into(),
        identity: RequesterIdentity::default(),
        locations: vec!["all".into()],
    });
    let fetcher = HttpCalendarFetcher::new(
        target,
        Arc::new(BerlinServiceAdapter::new()),
        FetchConfig::default(),
    )
    .unwrap();

    assert!(matches!(
        fetcher.fetch("all", None).await,
        FetchOutcome::FatalError(_)
    ));
}

#[tokio::test]
async fn fetch_through_unusable_proxy_is_fatal() {
    let target = Arc::new(WatchTarget {
        service_url: "https://service.berlin.de/dienstleistung/120686/".into(),
        identity: RequesterIdentity::default(),
        locations: vec!["all".into()],
    });
    let fetcher = HttpCalendarFetcher::new(
        target,
        Arc::new(BerlinServiceAdapter::new()),
        FetchConfig::default(),
    )
    .unwrap();
    let proxy = ProxyEndpoint {
        id: 0,
        address: "gopher://10.0.0.1:70".into(),
        identity: None,
    };

    assert!(matches!(
        fetcher.fetch("all", Some(proxy)).await,
        FetchOutcome::FatalError(_)
    ));
}

#[test]
fn slot_should_serialize_to_wire_format() {
    let slot = AppointmentSlot {
        location: "122210".into(),
        date_time: Utc.with_ymd_and_hms(2025, 1, 13, 8, 0, 0).unwrap(),
        slot_id: "1736755200".into(),
        capacity: Some(2),
    };

    let json = serde_json::to_value(&slot).unwrap();

    assert_eq!(
        json,
        serde_json::json!({
            "location": "122210",
            "date_time": "2025-01-13T08:00:00Z",
            "slot_id": "1736755200",
            "capacity": 2
        })
    );
    let back: AppointmentSlot = serde_json::from_value(json).unwrap();
    assert_eq!(back, slot);
}
