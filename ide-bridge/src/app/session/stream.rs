use super::registry::{OpenedSession, SessionRegistry};
use crate::domain::session::{CloseReason, SessionId};
use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

/// Deregisters the session when the HTTP response body is dropped.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry
            .close(&self.session_id, CloseReason::ClientDisconnected);
    }
}

/// `endpoint` event first, then one `message` event per queued JSON value.
///
/// The stream ends when the session leaves the registry (eviction, shutdown).
pub fn session_event_stream(
    registry: Arc<SessionRegistry>,
    opened: OpenedSession,
    endpoint_url: String,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let guard = SessionGuard {
        registry,
        session_id: opened.session_id,
    };
    let endpoint = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint_url))
    });
    let messages = ReceiverStream::new(opened.messages).map(move |message| {
        let _session = &guard;
        Ok(Event::default().event("message").data(message.to_string()))
    });
    endpoint.chain(messages)
}
