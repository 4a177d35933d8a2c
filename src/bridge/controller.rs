use anyhow::{bail, Context, Result};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, Reading},
    hub::Hub,
    metrics::MetricsCollector,
    settings::MqttSettings,
};

use super::{
    dispatcher::{spawn_dispatcher, Dispatcher},
    state::BridgeState,
    transport::transport_loop,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Readings buffered between the transport loop and the dispatcher.
pub const READING_QUEUE_CAPACITY: usize = 1024;
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct BridgeController {
    transport: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    state_tx: watch::Sender<BridgeState>,
}

impl BridgeController {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(BridgeState::Disconnected);
        Self {
            transport: None,
            dispatcher: None,
            cancel_token: None,
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> BridgeState {
        *self.state_tx.borrow()
    }

    pub fn start(
        &mut self,
        mqtt: MqttSettings,
        db: Database,
        hub: Hub,
        metrics: MetricsCollector,
    ) -> Result<()> {
        if self.transport.is_some() {
            bail!("bridge already running");
        }

        let (queue_tx, queue_rx) = mpsc::channel::<Reading>(READING_QUEUE_CAPACITY);
        let dispatcher = spawn_dispatcher(queue_rx, Dispatcher::new(db, hub, metrics.clone()));

        let cancel_token = CancellationToken::new();
        let transport = tokio::spawn(transport_loop(
            mqtt,
            queue_tx,
            metrics,
            self.state_tx.clone(),
            cancel_token.clone(),
        ));

        self.transport = Some(transport);
        self.dispatcher = Some(dispatcher);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Stops the transport (which disconnects from the broker and closes the queue),
    /// then lets the dispatcher drain what is already queued.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.transport.take() {
            handle.await.context("transport loop task failed to join")?;
        }

        if let Some(mut handle) = self.dispatcher.take() {
            match time::timeout(DISPATCH_DRAIN_TIMEOUT, &mut handle).await {
                Ok(joined) => joined.context("dispatcher task failed to join")?,
                Err(_) => {
                    log_warn!("dispatcher still draining after {DISPATCH_DRAIN_TIMEOUT:?}; aborting");
                    handle.abort();
                }
            }
        }

        log_info!("bridge stopped");
        Ok(())
    }
}

impl Default for BridgeController {
    fn default() -> Self {
        Self::new()
    }
}
