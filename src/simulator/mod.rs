//! Stand-in for the compressor board: publishes synthetic readings to the broker
//! through its own MQTT client, exercising the same path as real hardware.

pub mod generator;

pub use generator::generate_reading;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, QoS};
use tokio::{
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::settings::MqttSettings;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const PUBLISH_CAPACITY: usize = 64;
const PROGRESS_EVERY: u64 = 1_000;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SimulatorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SimulatorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, mqtt: MqttSettings, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("simulator already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(simulator_loop(mqtt, interval, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("simulator task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for SimulatorController {
    fn default() -> Self {
        Self::new()
    }
}

async fn simulator_loop(mqtt: MqttSettings, interval: Duration, cancel_token: CancellationToken) {
    let mut options =
        MqttOptions::new(mqtt.client_id("simulator"), mqtt.host.clone(), mqtt.port);
    options.set_keep_alive(mqtt.keep_alive());

    let (client, eventloop) = AsyncClient::new(options, PUBLISH_CAPACITY);
    let mut driver = tokio::spawn(drive_eventloop(eventloop, mqtt.reconnect_delay()));

    let mut rng = StdRng::from_entropy();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut published: u64 = 0;
    let mut failing = false;
    log_info!("simulator publishing to {} every {:?}", mqtt.topic, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reading = generate_reading(&mut rng, Utc::now());
                let payload = match serde_json::to_vec(&reading) {
                    Ok(payload) => payload,
                    Err(err) => {
                        log_error!("failed to encode simulated reading: {err}");
                        break;
                    }
                };

                match client.try_publish(mqtt.topic.clone(), QoS::AtMostOnce, false, payload) {
                    Ok(()) => {
                        if failing {
                            log_info!("simulator publishing again");
                            failing = false;
                        }
                        published += 1;
                        if published % PROGRESS_EVERY == 0 {
                            log_info!("simulator published {published} readings");
                        }
                    }
                    Err(err) => {
                        if !failing {
                            log_warn!("simulator cannot publish: {err}");
                            failing = true;
                        }
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                break;
            }
        }
    }

    if client.try_disconnect().is_ok()
        && time::timeout(DISCONNECT_TIMEOUT, &mut driver).await.is_ok()
    {
        log_info!("simulator disconnected after {published} readings");
        return;
    }
    driver.abort();
    log_info!("simulator stopped after {published} readings");
}

/// Keeps the simulator's connection alive. Ends once DISCONNECT has been sent.
async fn drive_eventloop(mut eventloop: EventLoop, reconnect_delay: Duration) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(err) => {
                log_warn!("simulator connection error: {err}");
                time::sleep(reconnect_delay).await;
            }
        }
    }
}
