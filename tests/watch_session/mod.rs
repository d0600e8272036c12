use std::sync::Arc;
use std::time::Duration;

use slotwatch::BerlinServiceAdapter;
use slotwatch::LocationState;
use slotwatch::PushMessage;
use slotwatch::WatchSessionBuilder;
use tokio::sync::watch;

use crate::common::calendar_page;
use crate::common::connect;
use crate::common::days_from_now;
use crate::common::next_message;
use crate::common::next_slot;
use crate::common::next_status;
use crate::common::session_config;
use crate::common::FakeSite;
use crate::common::WAIT_TIMEOUT;

#[tokio::test]
async fn test_new_slot_reaches_websocket_client_once() {
    let site = FakeSite::start().await;
    let date = days_from_now(5);
    site.respond_with(200, calendar_page(&[date.timestamp()]));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let session = WatchSessionBuilder::new(session_config(&site.base_url()), shutdown_rx)
        .site_adapter(Arc::new(BerlinServiceAdapter::with_base_url(site.base_url())))
        .build()
        .unwrap();
    let hub = session.hub();
    let push_server = session
        .bind_push_server("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let push_addr = push_server.local_addr().unwrap();

    // connect before polling starts so the slot arrives as a live update
    let mut client = connect(push_addr).await;
    let running = tokio::spawn(session.run_with_push_server(push_server));

    let slot = next_slot(&mut client).await;
    assert_eq!(slot.location, "all");
    assert_eq!(slot.date_time, date);
    assert_eq!(slot.slot_id, date.timestamp().to_string());

    // later polls see the same slot and stay silent
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(site.requests().len() >= 4);
    assert_eq!(hub.published_count(), 1);

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(WAIT_TIMEOUT, running).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_layout_change_suspends_location_until_resumed() {
    let site = FakeSite::start().await;
    site.respond_with(200, "<html><p>Neue Terminvereinbarung</p></html>");

    let mut config = session_config(&site.base_url());
    config.target.locations = vec!["122210".into()];
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let session = WatchSessionBuilder::new(config, shutdown_rx)
        .site_adapter(Arc::new(BerlinServiceAdapter::with_base_url(site.base_url())))
        .build()
        .unwrap();
    let scheduler = session.scheduler();
    let push_server = session
        .bind_push_server("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let running = tokio::spawn(session.run_with_push_server(push_server));

    tokio::time::timeout(WAIT_TIMEOUT, async {
        while scheduler.status()[0].state != LocationState::Suspended {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("location never suspended");
    let polls_when_suspended = site.requests().len();

    // suspended: no further polls
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(site.requests().len(), polls_when_suspended);

    site.respond_with(200, calendar_page(&[]));
    assert!(scheduler.resume("122210"));
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while site.requests().len() == polls_when_suspended {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("location never polled again");

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(WAIT_TIMEOUT, running).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_blocked_site_is_reported_to_clients() {
    let site = FakeSite::start().await;
    site.respond_with(429, "<html>slow down</html>");

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let session = WatchSessionBuilder::new(session_config(&site.base_url()), shutdown_rx)
        .site_adapter(Arc::new(BerlinServiceAdapter::with_base_url(site.base_url())))
        .build()
        .unwrap();
    let push_server = session
        .bind_push_server("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let push_addr = push_server.local_addr().unwrap();

    let mut early = connect(push_addr).await;
    let running = tokio::spawn(session.run_with_push_server(push_server));

    let status = next_status(&mut early).await;
    assert_eq!(status.location, "all");
    assert_eq!(status.state, LocationState::Backoff);
    assert_eq!(status.status, 502);
    assert_eq!(status.message.as_deref(), Some("blocked"));

    // a client joining later is told right away
    let mut late = connect(push_addr).await;
    match next_message(&mut late).await {
        PushMessage::Status(latest) => assert_eq!(latest.status, 502),
        other => panic!("expected a status first, got {other:?}"),
    }

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(WAIT_TIMEOUT, running).await.unwrap().unwrap();
    assert!(result.is_ok());
}
