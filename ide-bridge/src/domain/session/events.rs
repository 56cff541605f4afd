use super::value_object::SessionId;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    QueueOverflow,
    ChannelClosed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnected => "client_disconnected",
            CloseReason::QueueOverflow => "queue_overflow",
            CloseReason::ChannelClosed => "channel_closed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Opened,
    Closed { reason: CloseReason },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionEventEnvelope {
    pub session_id: SessionId,
    pub occurred_at: DateTime<Utc>,
    pub event: SessionEvent,
}

impl SessionEventEnvelope {
    pub fn new(session_id: SessionId, event: SessionEvent) -> Self {
        Self {
            session_id,
            occurred_at: Utc::now(),
            event,
        }
    }
}
