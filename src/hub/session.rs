use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tokio::sync::mpsc;

/// Frames queued per viewer before it counts as stalled.
pub const SESSION_QUEUE_CAPACITY: usize = 256;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The hub's side of a viewer session: an identity and the means to send.
/// Owning the socket stays with the endpoint holding the matching receiver.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    sender: mpsc::Sender<Arc<str>>,
}

impl SessionHandle {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let id = SessionId::next();
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<Arc<str>> {
        &self.sender
    }
}
