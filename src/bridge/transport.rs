use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{db::Reading, metrics::MetricsCollector, settings::MqttSettings};

use super::{codec::decode_payload, state::BridgeState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const REQUEST_CAPACITY: usize = 16;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Decodes one inbound payload and hands it to the dispatcher queue.
/// Returns `false` when the payload was discarded.
pub async fn ingest_payload(
    payload: &[u8],
    queue: &mpsc::Sender<Reading>,
    metrics: &MetricsCollector,
) -> bool {
    let reading = match decode_payload(payload) {
        Ok(reading) => reading,
        Err(err) => {
            log_warn!("discarding {} byte payload: {err}", payload.len());
            metrics.record_decode_failure();
            return false;
        }
    };

    if queue.send(reading).await.is_err() {
        log_error!("reading queue closed; dropping reading");
        return false;
    }
    true
}

fn set_state(state_tx: &watch::Sender<BridgeState>, next: BridgeState) {
    state_tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        log_info!("bridge {} -> {}", current.as_str(), next.as_str());
        *current = next;
        true
    });
}

/// Queues a SUBSCRIBE for the configured topic. Returns `false` when the client
/// could not take the request and the caller must try again later.
fn request_subscription(client: &AsyncClient, topic: &str) -> bool {
    match client.try_subscribe(topic, QoS::AtMostOnce) {
        Ok(()) => true,
        Err(err) => {
            log_error!("failed to queue subscribe for {topic}: {err}");
            false
        }
    }
}

/// Owns the broker connection: subscribes on every ConnAck, feeds publishes into
/// `queue`, and keeps polling through outages until `cancel_token` fires.
///
/// Only a granted SubAck counts as `Subscribed`. A rejected or unsent subscribe
/// keeps the bridge in `Connecting` and is retried after `reconnect_delay`.
pub async fn transport_loop(
    mqtt: MqttSettings,
    queue: mpsc::Sender<Reading>,
    metrics: MetricsCollector,
    state_tx: watch::Sender<BridgeState>,
    cancel_token: CancellationToken,
) {
    let mut options = MqttOptions::new(mqtt.client_id("bridge"), mqtt.host.clone(), mqtt.port);
    options.set_keep_alive(mqtt.keep_alive());
    options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    set_state(&state_tx, BridgeState::Connecting);
    log_info!("connecting to mqtt://{}:{}", mqtt.host, mqtt.port);

    let mut resubscribe_at: Option<Instant> = None;

    loop {
        let event = tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = time::sleep_until(resubscribe_at.unwrap_or_else(Instant::now)),
                if resubscribe_at.is_some() =>
            {
                resubscribe_at = None;
                log_info!("retrying subscribe to {}", mqtt.topic);
                if !request_subscription(&client, &mqtt.topic) {
                    resubscribe_at = Some(Instant::now() + mqtt.reconnect_delay());
                }
                continue;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                log_info!("broker accepted connection ({:?}); subscribing to {}", ack.code, mqtt.topic);
                resubscribe_at = None;
                if !request_subscription(&client, &mqtt.topic) {
                    resubscribe_at = Some(Instant::now() + mqtt.reconnect_delay());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if rejected {
                    set_state(&state_tx, BridgeState::Connecting);
                    log_warn!(
                        "broker rejected subscription to {}; retrying in {:?}",
                        mqtt.topic,
                        mqtt.reconnect_delay()
                    );
                    resubscribe_at = Some(Instant::now() + mqtt.reconnect_delay());
                } else {
                    set_state(&state_tx, BridgeState::Subscribed);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                log_debug!("{} bytes on {}", publish.payload.len(), publish.topic);
                ingest_payload(&publish.payload, &queue, &metrics).await;
            }
            Ok(_) => {}
            Err(err) => {
                // The next ConnAck subscribes again.
                resubscribe_at = None;
                set_state(&state_tx, BridgeState::Disconnected);
                log_warn!(
                    "mqtt connection error: {err}; retrying in {:?}",
                    mqtt.reconnect_delay()
                );
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = time::sleep(mqtt.reconnect_delay()) => {}
                }
                set_state(&state_tx, BridgeState::Connecting);
            }
        }
    }

    disconnect(&client, &mut eventloop).await;
    set_state(&state_tx, BridgeState::Disconnected);
    log_info!("transport loop shutting down");
}

/// Sends DISCONNECT and polls until it is on the wire, the link drops, or the timeout passes.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(err) = client.try_disconnect() {
        log_warn!("failed to queue mqtt disconnect: {err}");
        return;
    }

    let drained = time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if drained.is_err() {
        log_warn!("mqtt disconnect did not complete within {DISCONNECT_TIMEOUT:?}");
    }
}
