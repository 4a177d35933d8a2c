use serde::{Deserialize, Serialize};

/// Connection state of the bridge's broker subscription.
///
/// `Disconnected -> Connecting -> Subscribed`, falling back to `Disconnected` on any
/// transport error and reconnecting from there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Subscribed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Connecting => "connecting",
            BridgeState::Subscribed => "subscribed",
        }
    }
}
