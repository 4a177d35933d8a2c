//! Broker-facing half of the service.
//!
//! The transport loop owns the MQTT connection and only decodes; readings cross
//! into the rest of the process through a bounded queue whose single consumer,
//! the dispatcher, is the one place that touches the store and the hub.

pub mod codec;
pub mod controller;
pub mod dispatcher;
pub mod state;
pub mod transport;

pub use codec::{decode_payload, DecodeError};
pub use controller::{BridgeController, READING_QUEUE_CAPACITY};
pub use dispatcher::{spawn_dispatcher, Dispatcher};
pub use state::BridgeState;
pub use transport::ingest_payload;
