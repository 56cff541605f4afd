use crate::domain::context::OpenFileState;
use crate::domain::diff::{DiffSpan, ReviewAction};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Runtime error raised by an editor host.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("no view for {0}")]
    NotFound(String),
    #[error("editor i/o on {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("editor unavailable: {0}")]
    Unavailable(String),
}

impl EditorError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        EditorError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reference to one open editor view.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ViewHandle {
    pub id: u64,
    pub path: String,
}

/// Reviewer gestures for one rendered diff. Ends when the review UI goes away.
pub type ReviewActions = mpsc::Receiver<ReviewAction>;

/// Sender half for the review UI and the stream handed back from `render_review_ui`.
pub fn review_channel(capacity: usize) -> (mpsc::Sender<ReviewAction>, ReviewActions) {
    mpsc::channel(capacity.max(1))
}

/// Capabilities the bridge needs from the host editor.
///
/// Implementations are owned by the editor main loop and only ever called from it, so
/// methods take `&mut self` and need not be `Sync`.
#[async_trait]
pub trait EditorPort: Send {
    fn id(&self) -> &str;

    /// Open (or focus) a view for `path`. Missing files still get a view.
    async fn open_file(&mut self, path: &str) -> Result<ViewHandle, EditorError>;

    /// Existing view for `path`, if the editor still has one.
    async fn find_view(&mut self, path: &str) -> Option<ViewHandle>;

    /// Current text of the view as the user last saved it.
    async fn read_content(&mut self, view: &ViewHandle) -> Result<String, EditorError>;

    /// Put proposed text into the view buffer without saving.
    async fn stage_content(&mut self, view: &ViewHandle, text: &str) -> Result<(), EditorError>;

    async fn highlight(&mut self, view: &ViewHandle, spans: &[DiffSpan]) -> Result<(), EditorError>;

    /// Scroll to a 0-based line/character.
    async fn reveal(
        &mut self,
        view: &ViewHandle,
        line: usize,
        character: usize,
    ) -> Result<(), EditorError>;

    async fn render_review_ui(
        &mut self,
        view: &ViewHandle,
        explanation: &str,
    ) -> Result<ReviewActions, EditorError>;

    /// Save `text` and clear review decorations. Returns the content that ended up saved.
    async fn persist_content(
        &mut self,
        view: &ViewHandle,
        text: &str,
    ) -> Result<String, EditorError>;

    /// Put `text` back into the buffer and clear review decorations.
    async fn restore_content(&mut self, view: &ViewHandle, text: &str) -> Result<(), EditorError>;

    async fn query_open_files(&mut self) -> Result<Vec<OpenFileState>, EditorError>;
}
