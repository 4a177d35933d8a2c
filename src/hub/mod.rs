//! Fan-out of readings to live viewer sessions.
//!
//! The hub owns the set of active sessions. `broadcast` serializes a reading once
//! and pushes the frame into every session's queue; the lock on the set is only
//! held to copy or mutate the map, never while sending.

mod session;

pub use session::{SessionHandle, SessionId, SESSION_QUEUE_CAPACITY};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;

use crate::db::Reading;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone, Default)]
pub struct Hub {
    sessions: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Adds a session. Returns `false` if a session with the same id is already active.
    pub fn register(&self, session: SessionHandle) -> bool {
        let id = session.id();
        let inserted = {
            let mut sessions = self.lock_sessions();
            if sessions.contains_key(&id) {
                false
            } else {
                sessions.insert(id, session);
                true
            }
        };

        if inserted {
            log_info!("{id} registered ({} active)", self.session_count());
        }
        inserted
    }

    /// Removes a session. Removing an absent session is a no-op.
    pub fn deregister(&self, id: SessionId) -> bool {
        let removed = self.lock_sessions().remove(&id).is_some();
        if removed {
            log_info!("{id} deregistered ({} active)", self.session_count());
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_registered(&self, id: SessionId) -> bool {
        self.lock_sessions().contains_key(&id)
    }

    pub fn broadcast(&self, reading: &Reading) -> Result<BroadcastReport> {
        let frame: Arc<str> = serde_json::to_string(reading)
            .context("failed to serialize reading for broadcast")?
            .into();
        Ok(self.broadcast_frame(frame))
    }

    /// Queues `frame` on every active session. A session whose queue is full or
    /// closed is removed; the rest still receive the frame.
    pub fn broadcast_frame(&self, frame: Arc<str>) -> BroadcastReport {
        let targets: Vec<SessionHandle> = self.lock_sessions().values().cloned().collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for session in &targets {
            match session.sender().try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log_warn!("{} is not keeping up; dropping it", session.id());
                    failed.push(session.id());
                }
                Err(TrySendError::Closed(_)) => failed.push(session.id()),
            }
        }

        if !failed.is_empty() {
            let mut sessions = self.lock_sessions();
            for id in &failed {
                sessions.remove(id);
            }
            report.dropped = failed.len();
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ReadingStatus;

    fn reading(ax: f64) -> Reading {
        Reading {
            timestamp: "2026-10-18 12:00:00.000".into(),
            ax,
            ay: 0.1,
            az: 1.0,
            temp: 50.0,
            amp: 4.0,
            rul_predict: 120.0,
            status: ReadingStatus::from_vibration(ax, 0.1),
        }
    }

    #[test]
    fn register_is_idempotent_per_identity() {
        let hub = Hub::new();
        let (session, _rx) = SessionHandle::new(4);

        assert!(hub.register(session.clone()));
        assert!(!hub.register(session.clone()));
        assert_eq!(hub.session_count(), 1);
    }

    #[test]
    fn deregister_absent_session_is_noop() {
        let hub = Hub::new();
        let (session, _rx) = SessionHandle::new(4);

        assert!(!hub.deregister(session.id()));
        hub.register(session.clone());
        assert!(hub.deregister(session.id()));
        assert!(!hub.deregister(session.id()));
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn every_session_receives_exactly_one_copy() {
        let hub = Hub::new();
        let mut receivers = Vec::new();
        for _ in 0..8 {
            let (session, rx) = SessionHandle::new(4);
            hub.register(session);
            receivers.push(rx);
        }

        let report = hub.broadcast(&reading(1.3)).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 8, dropped: 0 });

        for rx in &mut receivers {
            let frame = rx.try_recv().unwrap();
            let decoded: Reading = serde_json::from_str(&frame).unwrap();
            assert_eq!(decoded, reading(1.3));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn closed_session_is_removed_and_others_still_receive() {
        let hub = Hub::new();
        let (alive, mut alive_rx) = SessionHandle::new(4);
        let (gone, gone_rx) = SessionHandle::new(4);
        hub.register(alive.clone());
        hub.register(gone.clone());
        drop(gone_rx);

        let report = hub.broadcast(&reading(0.2)).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert!(!hub.is_registered(gone.id()));
        assert!(hub.is_registered(alive.id()));

        let report = hub.broadcast(&reading(0.3)).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0 });
        assert_eq!(alive_rx.try_recv().map(|f| f.contains("0.2")).ok(), Some(true));
        assert_eq!(alive_rx.try_recv().map(|f| f.contains("0.3")).ok(), Some(true));
    }

    #[test]
    fn stalled_session_is_removed_when_its_queue_fills() {
        let hub = Hub::new();
        let (slow, _slow_rx) = SessionHandle::new(1);
        hub.register(slow.clone());

        assert_eq!(hub.broadcast(&reading(0.1)).unwrap().delivered, 1);
        let report = hub.broadcast(&reading(0.2)).unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn frames_arrive_in_broadcast_order() {
        let hub = Hub::new();
        let (session, mut rx) = SessionHandle::new(16);
        hub.register(session);

        for i in 0..10 {
            hub.broadcast(&reading(i as f64 / 10.0)).unwrap();
        }

        for i in 0..10 {
            let frame = rx.try_recv().unwrap();
            let decoded: Reading = serde_json::from_str(&frame).unwrap();
            assert_eq!(decoded.ax, i as f64 / 10.0);
        }
    }
}
