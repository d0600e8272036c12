use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use slotwatch::AppointmentSlot;
use slotwatch::LocationState;
use slotwatch::LocationStatus;
use slotwatch::NotificationHub;
use slotwatch::PushMessage;
use slotwatch::PushServer;
use slotwatch::SlotRegistry;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::common::connect;
use crate::common::days_from_now;
use crate::common::next_message;
use crate::common::next_slot;
use crate::common::WAIT_TIMEOUT;

struct PushHarness {
    hub: NotificationHub,
    registry: Arc<SlotRegistry>,
    addr: std::net::SocketAddr,
    shutdown_tx: watch::Sender<()>,
    server: tokio::task::JoinHandle<slotwatch::Result<()>>,
}

async fn start_push_server(replay_on_connect: bool) -> PushHarness {
    let hub = NotificationHub::new(16);
    let registry = Arc::new(SlotRegistry::new(2));
    let server = PushServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        hub.clone(),
        registry.clone(),
        replay_on_connect,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let server = tokio::spawn(server.run(shutdown_rx));

    PushHarness {
        hub,
        registry,
        addr,
        shutdown_tx,
        server,
    }
}

async fn wait_for_subscribers(
    hub: &NotificationHub,
    expected: usize,
) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while hub.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count never reached");
}

#[tokio::test]
async fn test_client_receives_replay_then_new_slots() {
    let harness = start_push_server(true).await;
    let present = AppointmentSlot::new("122210", days_from_now(2), "present");
    harness.registry.apply("122210", vec![present.clone()]);

    let mut client = connect(harness.addr).await;
    assert_eq!(next_slot(&mut client).await, present);

    let fresh = AppointmentSlot::new("122217", days_from_now(3), "fresh");
    harness.hub.publish(&fresh);
    assert_eq!(next_slot(&mut client).await, fresh);
}

#[tokio::test]
async fn test_every_client_gets_every_slot_in_order() {
    let harness = start_push_server(false).await;
    let mut first = connect(harness.addr).await;
    let mut second = connect(harness.addr).await;
    wait_for_subscribers(&harness.hub, 2).await;

    let slots: Vec<AppointmentSlot> = (0..3)
        .map(|i| AppointmentSlot::new("all", days_from_now(i + 1), format!("s{i}")))
        .collect();
    for slot in &slots {
        harness.hub.publish(slot);
    }

    for client in [&mut first, &mut second] {
        for slot in &slots {
            assert_eq!(&next_slot(client).await, slot);
        }
    }
}

#[tokio::test]
async fn test_inbound_frames_are_ignored() {
    let harness = start_push_server(false).await;
    let mut client = connect(harness.addr).await;
    wait_for_subscribers(&harness.hub, 1).await;

    client.send(Message::Text("subscribe please".into())).await.unwrap();
    let slot = AppointmentSlot::new("all", days_from_now(1), "after-chatter");
    harness.hub.publish(&slot);

    assert_eq!(next_slot(&mut client).await, slot);
}

#[tokio::test]
async fn test_client_close_unsubscribes() {
    let harness = start_push_server(false).await;
    let mut client = connect(harness.addr).await;
    wait_for_subscribers(&harness.hub, 1).await;

    client.close(None).await.unwrap();

    wait_for_subscribers(&harness.hub, 0).await;
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let harness = start_push_server(false).await;
    let mut client = connect(harness.addr).await;
    wait_for_subscribers(&harness.hub, 1).await;

    harness.shutdown_tx.send(()).unwrap();

    let frame = tokio::time::timeout(WAIT_TIMEOUT, client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Away),
        other => panic!("expected close frame, got {other:?}"),
    }

    let result = tokio::time::timeout(WAIT_TIMEOUT, harness.server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

fn blocked_status(location: &str) -> LocationStatus {
    LocationStatus {
        location: location.into(),
        state: LocationState::Backoff,
        status: 502,
        message: Some("blocked".into()),
        consecutive_failures: 1,
        last_success: None,
        last_appointments_found_on: None,
    }
}

#[tokio::test]
async fn test_client_gets_statuses_first_then_replay() {
    let harness = start_push_server(true).await;
    let present = AppointmentSlot::new("122210", days_from_now(2), "present");
    harness.registry.apply("122210", vec![present.clone()]);
    harness.hub.publish_status(blocked_status("122217"));

    let mut client = connect(harness.addr).await;

    assert_eq!(
        next_message(&mut client).await,
        PushMessage::Status(blocked_status("122217"))
    );
    assert_eq!(next_message(&mut client).await, PushMessage::Slot(present));

    let recovered = LocationStatus {
        state: LocationState::Idle,
        status: 200,
        message: None,
        consecutive_failures: 0,
        ..blocked_status("122217")
    };
    harness.hub.publish_status(recovered.clone());
    assert_eq!(next_message(&mut client).await, PushMessage::Status(recovered));
}

#[tokio::test]
async fn test_shutdown_is_not_held_up_by_a_client_that_stopped_reading() {
    let harness = start_push_server(false).await;
    // connected but never polled again
    let _stalled = connect(harness.addr).await;
    wait_for_subscribers(&harness.hub, 1).await;

    let filler = "x".repeat(256 * 1024);
    for i in 0..200 {
        let slot = AppointmentSlot::new("all", days_from_now(1), format!("{i}-{filler}"));
        harness.hub.publish(&slot);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    harness.shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(WAIT_TIMEOUT, harness.server)
        .await
        .expect("push server hung on a stalled client")
        .unwrap();
    assert!(result.is_ok());
}
