use std::time::Duration;

use compressor_bridge_lib::{
    bridge::{ingest_payload, spawn_dispatcher, BridgeState, Dispatcher},
    db::{Database, Reading, ReadingStatus},
    hub::{Hub, SessionHandle},
    metrics::MetricsCollector,
    server, AppState,
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    time::{sleep, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const BOARD_PAYLOAD: &[u8] = br#"{"timestamp":"2026-10-18 12:00:00.000","ax":1.3,"ay":0.1,"az":1.0,"temp":50,"amp":4.0,"rul_predict":120,"status":1}"#;

struct Pipeline {
    db: Database,
    hub: Hub,
    metrics: MetricsCollector,
    queue: mpsc::Sender<Reading>,
}

fn pipeline() -> Pipeline {
    let db = Database::open_in_memory().unwrap();
    let hub = Hub::new();
    let metrics = MetricsCollector::new();
    let (queue, queue_rx) = mpsc::channel(16);
    spawn_dispatcher(
        queue_rx,
        Dispatcher::new(db.clone(), hub.clone(), metrics.clone()),
    );
    Pipeline {
        db,
        hub,
        metrics,
        queue,
    }
}

async fn wait_for_rows(db: &Database, expected: u64) -> u64 {
    for _ in 0..100 {
        let count = db.count_readings().await.unwrap();
        if count >= expected {
            return count;
        }
        sleep(Duration::from_millis(10)).await;
    }
    db.count_readings().await.unwrap()
}

async fn wait_for_sessions(hub: &Hub, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while hub.session_count() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count never settled");
}

fn assert_board_values(reading: &Reading) {
    assert_eq!(reading.ax, 1.3);
    assert_eq!(reading.ay, 0.1);
    assert_eq!(reading.az, 1.0);
    assert_eq!(reading.temp, 50.0);
    assert_eq!(reading.amp, 4.0);
    assert_eq!(reading.rul_predict, 120.0);
    assert_eq!(reading.status, ReadingStatus::Abnormal);
}

#[tokio::test]
async fn published_reading_reaches_viewer_and_store() {
    let p = pipeline();
    let (session, mut frames) = SessionHandle::new(8);
    p.hub.register(session);

    assert!(ingest_payload(BOARD_PAYLOAD, &p.queue, &p.metrics).await);

    let frame = timeout(Duration::from_secs(1), frames.recv())
        .await
        .expect("viewer did not receive the reading in time")
        .expect("session queue closed");
    let received: Reading = serde_json::from_str(&frame).unwrap();
    assert_board_values(&received);

    assert_eq!(wait_for_rows(&p.db, 1).await, 1);
    let stored = p.db.latest_readings(10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_board_values(&stored[0].reading);
}

#[tokio::test]
async fn malformed_payloads_produce_no_write_and_no_broadcast() {
    let p = pipeline();
    let (session, mut frames) = SessionHandle::new(8);
    p.hub.register(session);

    let truncated = &BOARD_PAYLOAD[..40];
    let missing_status = br#"{"timestamp":"t","ax":1.3,"ay":0.1,"az":1.0,"temp":50,"amp":4.0,"rul_predict":120}"#;
    assert!(!ingest_payload(truncated, &p.queue, &p.metrics).await);
    assert!(!ingest_payload(missing_status, &p.queue, &p.metrics).await);

    // A valid reading afterwards proves the pipeline is still alive and that
    // nothing from the bad payloads was queued ahead of it.
    assert!(ingest_payload(BOARD_PAYLOAD, &p.queue, &p.metrics).await);
    let frame = timeout(Duration::from_secs(1), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_board_values(&serde_json::from_str(&frame).unwrap());
    assert!(frames.try_recv().is_err());

    assert_eq!(wait_for_rows(&p.db, 1).await, 1);
    let counters = p.metrics.counters();
    assert_eq!(counters.decode_failures, 2);
    assert_eq!(counters.received, 1);
}

#[tokio::test]
async fn websocket_viewer_receives_broadcasts_and_is_deregistered_on_close() {
    let p = pipeline();
    let (_state_tx, bridge_state) = watch::channel(BridgeState::Subscribed);
    let state = AppState {
        db: p.db.clone(),
        hub: p.hub.clone(),
        metrics: p.metrics.clone(),
        bridge_state,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    let (mut viewer, _) = connect_async(format!("ws://{addr}/ws/frontend"))
        .await
        .expect("websocket handshake failed");
    wait_for_sessions(&p.hub, 1).await;

    // Client payloads are accepted and ignored.
    viewer.send(Message::Text("hello".into())).await.unwrap();
    assert!(ingest_payload(BOARD_PAYLOAD, &p.queue, &p.metrics).await);

    let message = timeout(Duration::from_secs(1), async {
        loop {
            match viewer.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("viewer stream ended: {other:?}"),
            }
        }
    })
    .await
    .expect("viewer did not receive the reading in time");
    assert_board_values(&serde_json::from_str(&message).unwrap());

    viewer.close(None).await.unwrap();
    wait_for_sessions(&p.hub, 0).await;

    shutdown.cancel();
    timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
}
