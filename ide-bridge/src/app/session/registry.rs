use crate::domain::session::{CloseReason, Session, SessionId};
use crate::telemetry::BridgeMetrics;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("session {0} is not registered")]
    UnknownSession(SessionId),
    #[error("session {0} queue is full; session evicted")]
    QueueFull(SessionId),
    #[error("session {0} stream already closed")]
    Closed(SessionId),
}

/// A freshly registered session and the receiving end of its outbound queue.
#[derive(Debug)]
pub struct OpenedSession {
    pub session_id: SessionId,
    pub messages: mpsc::Receiver<Value>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub evicted: Vec<SessionId>,
}

struct Slot {
    session: Session,
    tx: mpsc::Sender<Value>,
    seq: u64,
}

#[derive(Default)]
struct Table {
    slots: HashMap<SessionId, Slot>,
    next_seq: u64,
}

/// Live sessions and their bounded outbound queues.
///
/// Delivery never waits: a full queue evicts the session, which ends its stream.
pub struct SessionRegistry {
    inner: Mutex<Table>,
    capacity: usize,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl SessionRegistry {
    pub fn new(capacity: usize, metrics: Option<Arc<BridgeMetrics>>) -> Self {
        Self {
            inner: Mutex::new(Table::default()),
            capacity: capacity.max(1),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self) -> OpenedSession {
        let (session, event) = Session::open();
        let (tx, rx) = mpsc::channel(self.capacity);
        let session_id = session.id();
        {
            let mut table = self.lock();
            table.next_seq += 1;
            let seq = table.next_seq;
            table
                .slots
                .insert(session_id.clone(), Slot { session, tx, seq });
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_session_opened();
        }
        info!(session_id = %event.session_id, "session opened");
        OpenedSession {
            session_id,
            messages: rx,
        }
    }

    pub fn enqueue(&self, session_id: &SessionId, message: Value) -> Result<(), DeliveryError> {
        let mut table = self.lock();
        let slot = table
            .slots
            .get(session_id)
            .ok_or_else(|| DeliveryError::UnknownSession(session_id.clone()))?;
        match slot.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Self::remove_locked(&mut table, session_id, CloseReason::QueueOverflow);
                drop(table);
                if let Some(metrics) = &self.metrics {
                    metrics.record_session_evicted();
                }
                warn!(session_id = %session_id, "session queue overflow; evicting");
                Err(DeliveryError::QueueFull(session_id.clone()))
            }
            Err(TrySendError::Closed(_)) => {
                Self::remove_locked(&mut table, session_id, CloseReason::ChannelClosed);
                Err(DeliveryError::Closed(session_id.clone()))
            }
        }
    }

    /// Deliver `message` to every session; failures only affect the failing session.
    pub fn broadcast(&self, message: &Value) -> FanOutReport {
        let mut report = FanOutReport::default();
        for session_id in self.ids() {
            match self.enqueue(&session_id, message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::QueueFull(id)) => report.evicted.push(id),
                Err(err) => debug!(%err, "skipping session during broadcast"),
            }
        }
        report
    }

    pub fn close(&self, session_id: &SessionId, reason: CloseReason) -> bool {
        let mut table = self.lock();
        Self::remove_locked(&mut table, session_id, reason)
    }

    pub fn close_all(&self, reason: CloseReason) -> usize {
        let mut table = self.lock();
        let ids: Vec<SessionId> = table.slots.keys().cloned().collect();
        ids.iter()
            .filter(|id| Self::remove_locked(&mut table, id, reason))
            .count()
    }

    fn remove_locked(table: &mut Table, session_id: &SessionId, reason: CloseReason) -> bool {
        let Some(mut slot) = table.slots.remove(session_id) else {
            return false;
        };
        if let Ok(event) = slot.session.close(reason) {
            let lifetime_ms = slot
                .session
                .lifetime()
                .map(|lifetime| lifetime.num_milliseconds())
                .unwrap_or_default();
            info!(
                session_id = %event.session_id,
                %reason,
                closed_at = %event.occurred_at.to_rfc3339(),
                lifetime_ms,
                "session closed"
            );
        }
        true
    }

    /// Most recently opened live session.
    pub fn latest(&self) -> Option<SessionId> {
        self.lock()
            .slots
            .iter()
            .max_by_key(|(_, slot)| slot.seq)
            .map(|(id, _)| id.clone())
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.lock().slots.contains_key(session_id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let table = self.lock();
        let mut slots: Vec<_> = table.slots.iter().map(|(id, slot)| (slot.seq, id.clone())).collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_preserves_order() {
        let registry = SessionRegistry::new(8, None);
        let mut opened = registry.open();
        for n in 0..3 {
            registry.enqueue(&opened.session_id, json!({ "n": n })).unwrap();
        }
        for n in 0..3 {
            assert_eq!(opened.messages.recv().await.unwrap()["n"], n);
        }
    }

    #[tokio::test]
    async fn overflow_evicts_and_ends_stream() {
        let registry = SessionRegistry::new(2, None);
        let mut opened = registry.open();
        registry.enqueue(&opened.session_id, json!(1)).unwrap();
        registry.enqueue(&opened.session_id, json!(2)).unwrap();
        assert_eq!(
            registry.enqueue(&opened.session_id, json!(3)),
            Err(DeliveryError::QueueFull(opened.session_id.clone()))
        );
        assert!(!registry.contains(&opened.session_id));
        assert_eq!(opened.messages.recv().await, Some(json!(1)));
        assert_eq!(opened.messages.recv().await, Some(json!(2)));
        assert_eq!(opened.messages.recv().await, None);
    }

    #[tokio::test]
    async fn broadcast_survives_one_full_queue() {
        let registry = SessionRegistry::new(1, None);
        let stuck = registry.open();
        let mut healthy = registry.open();
        registry.enqueue(&stuck.session_id, json!("backlog")).unwrap();

        let report = registry.broadcast(&json!("hello"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, vec![stuck.session_id.clone()]);
        assert_eq!(healthy.messages.recv().await, Some(json!("hello")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_receiver_is_reaped_on_delivery() {
        let registry = SessionRegistry::new(4, None);
        let opened = registry.open();
        let id = opened.session_id.clone();
        drop(opened);
        assert_eq!(
            registry.enqueue(&id, json!(1)),
            Err(DeliveryError::Closed(id.clone()))
        );
        assert!(registry.is_empty());
        assert_eq!(
            registry.enqueue(&id, json!(1)),
            Err(DeliveryError::UnknownSession(id))
        );
    }

    #[test]
    fn latest_tracks_open_order() {
        let registry = SessionRegistry::new(4, None);
        assert!(registry.latest().is_none());
        let first = registry.open();
        let second = registry.open();
        assert_eq!(registry.latest(), Some(second.session_id.clone()));
        assert!(registry.close(&second.session_id, CloseReason::ClientDisconnected));
        assert_eq!(registry.latest(), Some(first.session_id.clone()));
        assert!(!registry.close(&second.session_id, CloseReason::ClientDisconnected));
    }

    #[tokio::test]
    async fn close_all_ends_every_stream() {
        let registry = SessionRegistry::new(4, None);
        let mut a = registry.open();
        let mut b = registry.open();
        assert_eq!(registry.close_all(CloseReason::Shutdown), 2);
        assert!(a.messages.recv().await.is_none());
        assert!(b.messages.recv().await.is_none());
    }
}
