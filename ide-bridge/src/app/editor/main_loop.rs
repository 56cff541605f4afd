use super::handle::{EditorCommand, EditorHandle};
use crate::app::context::ContextBroadcaster;
use crate::app::diff::{align_lines, DiffReviewService};
use crate::domain::diff::{DiffSpan, PendingDiff, ReviewAction};
use crate::ports::editor::{EditorError, EditorPort, ReviewActions, ViewHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug)]
pub struct EditorLoopConfig {
    pub debounce: Duration,
    pub capacity: usize,
}

impl Default for EditorLoopConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            capacity: COMMAND_CAPACITY,
        }
    }
}

/// The running editor main loop.
pub struct EditorLoop {
    handle: EditorHandle,
    task: JoinHandle<()>,
}

impl EditorLoop {
    pub fn handle(&self) -> EditorHandle {
        self.handle.clone()
    }

    /// Ask the loop to stop and wait for it.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        if let Err(err) = self.task.await {
            warn!(%err, "editor loop ended abnormally");
        }
    }
}

struct Review {
    view: ViewHandle,
    spans: Vec<DiffSpan>,
    position: usize,
    forwarder: Option<JoinHandle<()>>,
}

impl Drop for Review {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

struct MainLoop {
    editor: Box<dyn EditorPort>,
    diffs: Arc<DiffReviewService>,
    broadcaster: Arc<ContextBroadcaster>,
    handle: EditorHandle,
    reviews: HashMap<String, Review>,
    context_deadline: Option<Instant>,
    debounce: Duration,
}

/// Spawn the single task that owns the editor and serializes every UI-side mutation.
pub fn spawn_editor_loop(
    editor: Box<dyn EditorPort>,
    diffs: Arc<DiffReviewService>,
    broadcaster: Arc<ContextBroadcaster>,
    config: EditorLoopConfig,
) -> EditorLoop {
    let (handle, mut rx) = EditorHandle::channel(config.capacity);
    info!(editor = editor.id(), "editor loop starting");
    let mut state = MainLoop {
        editor,
        diffs,
        broadcaster,
        handle: handle.clone(),
        reviews: HashMap::new(),
        context_deadline: None,
        debounce: config.debounce,
    };
    let task = tokio::spawn(async move {
        loop {
            let deadline = state.context_deadline;
            tokio::select! {
                biased;
                command = rx.recv() => {
                    match command {
                        Some(EditorCommand::Shutdown) | None => {
                            info!("editor loop received shutdown signal");
                            break;
                        }
                        Some(command) => state.dispatch(command).await,
                    }
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    state.context_deadline = None;
                    state.publish_context(false).await;
                }
            }
        }
        state.reviews.clear();
    });
    EditorLoop { handle, task }
}

impl MainLoop {
    async fn dispatch(&mut self, command: EditorCommand) {
        match command {
            EditorCommand::ShowDiff { file_path } => self.show_diff(file_path).await,
            EditorCommand::ResolveDiff {
                file_path,
                accepted,
                reply,
            } => {
                let resolved = self.resolve(&file_path, accepted).await;
                if let Some(reply) = reply {
                    let _ = reply.send(resolved);
                }
            }
            EditorCommand::ReviewAction { file_path, action } => {
                self.review_action(&file_path, action).await
            }
            EditorCommand::ViewClosed { file_path } => {
                if self.resolve(&file_path, false).await {
                    debug!(file_path = %file_path, "diff view closed; rejected");
                }
            }
            EditorCommand::NavigateTo {
                file_path,
                line,
                character,
            } => {
                match self.navigate(&file_path, line, character).await {
                    Ok(()) => self.schedule_context(),
                    Err(err) => warn!(%err, file_path = %file_path, "navigation failed"),
                }
            }
            EditorCommand::ContextChanged => self.schedule_context(),
            EditorCommand::PublishContext { force } => {
                self.context_deadline = None;
                self.publish_context(force).await;
            }
            EditorCommand::Shutdown => {}
        }
    }

    async fn show_diff(&mut self, file_path: String) {
        let Some(diff) = self.diffs.pending(&file_path) else {
            debug!(file_path = %file_path, "diff resolved before it was shown");
            return;
        };
        match self.render_diff(&diff).await {
            Ok(()) => self.schedule_context(),
            Err(err) => {
                warn!(%err, file_path = %file_path, "editor could not show diff");
                self.reviews.remove(&file_path);
                self.diffs.fail(&file_path, err.to_string());
            }
        }
    }

    /// Focus moved inside the loop; publish once the editor settles.
    fn schedule_context(&mut self) {
        self.context_deadline = Some(Instant::now() + self.debounce);
    }

    async fn render_diff(&mut self, diff: &PendingDiff) -> Result<(), EditorError> {
        let file_path = diff.file_path();
        let view = self.editor.open_file(file_path).await?;
        let original = self.editor.read_content(&view).await?;
        let spans = align_lines(&original, diff.new_content());
        if !self.diffs.attach_original(file_path, original) {
            return Ok(());
        }
        self.editor.stage_content(&view, diff.new_content()).await?;
        self.editor.highlight(&view, &spans).await?;
        if let Some(first) = spans.first() {
            self.editor.reveal(&view, first.anchor_line(), 0).await?;
        }
        let actions = self
            .editor
            .render_review_ui(&view, diff.explanation())
            .await?;
        let forwarder = spawn_action_forwarder(file_path.to_string(), actions, self.handle.clone());
        debug!(file_path = %file_path, spans = spans.len(), "diff shown");
        self.reviews.insert(
            file_path.to_string(),
            Review {
                view,
                spans,
                position: 0,
                forwarder: Some(forwarder),
            },
        );
        Ok(())
    }

    async fn resolve(&mut self, file_path: &str, accepted: bool) -> bool {
        self.reviews.remove(file_path);
        let resolved = self
            .diffs
            .resolve(self.editor.as_mut(), file_path, accepted)
            .await
            .is_some();
        if resolved {
            self.schedule_context();
        }
        resolved
    }

    async fn review_action(&mut self, file_path: &str, action: ReviewAction) {
        match action {
            ReviewAction::Accept => {
                self.resolve(file_path, true).await;
            }
            ReviewAction::Reject => {
                self.resolve(file_path, false).await;
            }
            ReviewAction::Next | ReviewAction::Prev => {
                let Some(review) = self.reviews.get_mut(file_path) else {
                    return;
                };
                let Some(target) = step(review.position, review.spans.len(), action) else {
                    return;
                };
                review.position = target;
                let line = review.spans[target].anchor_line();
                if let Err(err) = self.editor.reveal(&review.view, line, 0).await {
                    warn!(%err, file_path = %file_path, "could not move to change");
                }
            }
        }
    }

    async fn navigate(&mut self, file_path: &str, line: u32, character: u32) -> Result<(), EditorError> {
        let view = self.editor.open_file(file_path).await?;
        let line = usize::try_from(line.saturating_sub(1)).unwrap_or_default();
        let character = usize::try_from(character.saturating_sub(1)).unwrap_or_default();
        self.editor.reveal(&view, line, character).await
    }

    async fn publish_context(&mut self, force: bool) {
        match self.editor.query_open_files().await {
            Ok(files) => {
                self.broadcaster.publish(files, force);
            }
            Err(err) => warn!(%err, "querying open files failed"),
        }
    }
}

/// Next span index for a navigation gesture, wrapping at both ends.
fn step(position: usize, len: usize, action: ReviewAction) -> Option<usize> {
    if len == 0 {
        return None;
    }
    match action {
        ReviewAction::Next => Some((position + 1) % len),
        ReviewAction::Prev => Some((position + len - 1) % len),
        ReviewAction::Accept | ReviewAction::Reject => None,
    }
}

fn spawn_action_forwarder(
    file_path: String,
    mut actions: ReviewActions,
    handle: EditorHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(action) = actions.recv().await {
            let decided = action.is_decision();
            if !handle.review_action(file_path.clone(), action).await || decided {
                break;
            }
        }
    })
}
