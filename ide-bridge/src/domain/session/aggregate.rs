use super::events::{CloseReason, SessionEvent, SessionEventEnvelope};
use super::value_object::SessionId;
use chrono::{DateTime, Duration, Utc};

/// Lifecycle of one SSE connection. The outbound queue itself lives in the registry.
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn open() -> (Self, SessionEventEnvelope) {
        let session = Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            closed_at: None,
        };
        let envelope = SessionEventEnvelope::new(session.id.clone(), SessionEvent::Opened);
        (session, envelope)
    }

    pub fn id(&self) -> SessionId {
        self.id.clone()
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// How long the session was connected; `None` while it is still open.
    pub fn lifetime(&self) -> Option<Duration> {
        self.closed_at.map(|closed_at| closed_at - self.created_at)
    }

    pub fn close(&mut self, reason: CloseReason) -> Result<SessionEventEnvelope, String> {
        if !self.is_open() {
            return Err("session already closed".into());
        }
        let envelope = SessionEventEnvelope::new(self.id.clone(), SessionEvent::Closed { reason });
        self.closed_at = Some(envelope.occurred_at);
        Ok(envelope)
    }
}
