use crate::domain::diff::ReviewAction;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Work marshalled onto the editor main loop.
#[derive(Debug)]
pub enum EditorCommand {
    /// Render the pending diff registered for `file_path`.
    ShowDiff { file_path: String },
    /// Resolve a pending diff; `reply` learns whether anything was pending.
    ResolveDiff {
        file_path: String,
        accepted: bool,
        reply: Option<oneshot::Sender<bool>>,
    },
    ReviewAction {
        file_path: String,
        action: ReviewAction,
    },
    ViewClosed { file_path: String },
    /// 1-based position, as sent by clients.
    NavigateTo {
        file_path: String,
        line: u32,
        character: u32,
    },
    /// Selection or focus moved; publishes after the debounce window.
    ContextChanged,
    PublishContext { force: bool },
    Shutdown,
}

/// The only way into the editor main loop. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EditorHandle {
    tx: mpsc::Sender<EditorCommand>,
}

impl EditorHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EditorCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Returns `false` once the loop has stopped.
    pub async fn send(&self, command: EditorCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }

    pub async fn show_diff(&self, file_path: impl Into<String>) -> bool {
        self.send(EditorCommand::ShowDiff {
            file_path: file_path.into(),
        })
        .await
    }

    /// Resolve and wait for the loop to report whether a diff was pending.
    pub async fn resolve_diff(&self, file_path: impl Into<String>, accepted: bool) -> bool {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .send(EditorCommand::ResolveDiff {
                file_path: file_path.into(),
                accepted,
                reply: Some(reply),
            })
            .await;
        sent && rx.await.unwrap_or(false)
    }

    /// Resolve without waiting for the outcome.
    pub async fn request_resolve(&self, file_path: impl Into<String>, accepted: bool) -> bool {
        self.send(EditorCommand::ResolveDiff {
            file_path: file_path.into(),
            accepted,
            reply: None,
        })
        .await
    }

    pub async fn review_action(&self, file_path: impl Into<String>, action: ReviewAction) -> bool {
        self.send(EditorCommand::ReviewAction {
            file_path: file_path.into(),
            action,
        })
        .await
    }

    pub async fn view_closed(&self, file_path: impl Into<String>) -> bool {
        self.send(EditorCommand::ViewClosed {
            file_path: file_path.into(),
        })
        .await
    }

    pub async fn navigate_to(&self, file_path: impl Into<String>, line: u32, character: u32) -> bool {
        self.send(EditorCommand::NavigateTo {
            file_path: file_path.into(),
            line,
            character,
        })
        .await
    }

    pub async fn publish_context(&self, force: bool) -> bool {
        self.send(EditorCommand::PublishContext { force }).await
    }

    pub fn selection_changed(&self) {
        self.notify_context_changed("selection");
    }

    pub fn focus_changed(&self) {
        self.notify_context_changed("focus");
    }

    // Fire-and-forget; a full queue already holds work that will publish.
    fn notify_context_changed(&self, reason: &'static str) {
        if let Err(err) = self.tx.try_send(EditorCommand::ContextChanged) {
            debug!(%reason, %err, "context change not queued");
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(EditorCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
