use crate::app::editor::EditorHandle;
use crate::app::session::SessionRegistry;
use crate::domain::diff::{DiffResolution, PendingDiff};
use crate::domain::session::SessionId;
use crate::ports::editor::{EditorError, EditorPort, ViewHandle};
use crate::telemetry::BridgeMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("a diff for {0} is already awaiting review")]
    Conflict(String),
    #[error("timed out after {}s waiting for review of {path}", .waited.as_secs())]
    Timeout { path: String, waited: Duration },
    #[error("review of {0} was abandoned")]
    Abandoned(String),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Debug)]
pub struct OpenDiffRequest {
    pub file_path: String,
    pub new_content: String,
    pub explanation: String,
    pub blocking: bool,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum OpenDiffOutcome {
    /// Non-blocking: the diff is on screen (or queued for it).
    Opened,
    /// Blocking: the reviewer decided.
    Resolved(DiffResolution),
}

/// Pending diff as exposed over the review endpoints.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDiffView {
    pub file_path: String,
    pub session_id: Option<SessionId>,
    pub blocking: bool,
    pub created_at: DateTime<Utc>,
}

struct Entry {
    diff: PendingDiff,
    waiter: Option<oneshot::Sender<DiffResolution>>,
}

/// Pending diffs keyed by file path, and the rendezvous with blocked callers.
///
/// `resolve` is only driven by the editor main loop; removal from the map is what makes it
/// idempotent.
pub struct DiffReviewService {
    pending: Mutex<HashMap<String, Entry>>,
    registry: Arc<SessionRegistry>,
    blocking_timeout: Duration,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl DiffReviewService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        blocking_timeout: Duration,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            registry,
            blocking_timeout,
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the diff, ask the editor to show it and, when blocking, wait for the decision.
    ///
    /// On timeout the diff stays pending; its outcome still reaches the session later.
    pub async fn open_diff(
        &self,
        request: OpenDiffRequest,
        editor: &EditorHandle,
    ) -> Result<OpenDiffOutcome, DiffError> {
        let file_path = request.file_path.clone();
        let waiter = self.register(request)?;
        if !editor.show_diff(file_path.clone()).await {
            self.lock().remove(&file_path);
            return Err(DiffError::Internal("editor loop is not running".into()));
        }
        let Some(waiter) = waiter else {
            return Ok(OpenDiffOutcome::Opened);
        };
        match tokio::time::timeout(self.blocking_timeout, waiter).await {
            Ok(Ok(resolution)) => Ok(OpenDiffOutcome::Resolved(resolution)),
            Ok(Err(_)) => Err(DiffError::Abandoned(file_path)),
            Err(_) => {
                warn!(file_path = %file_path, "blocking diff timed out; left pending");
                Err(DiffError::Timeout {
                    path: file_path,
                    waited: self.blocking_timeout,
                })
            }
        }
    }

    fn register(
        &self,
        request: OpenDiffRequest,
    ) -> Result<Option<oneshot::Receiver<DiffResolution>>, DiffError> {
        let mut pending = self.lock();
        if pending.contains_key(&request.file_path) {
            return Err(DiffError::Conflict(request.file_path));
        }
        let (waiter, rx) = if request.blocking {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let diff = PendingDiff::new(
            request.file_path.clone(),
            request.session_id,
            request.new_content,
            request.explanation,
            request.blocking,
        );
        info!(file_path = %request.file_path, blocking = request.blocking, "diff pending review");
        pending.insert(request.file_path, Entry { diff, waiter });
        Ok(rx)
    }

    pub fn pending(&self, file_path: &str) -> Option<PendingDiff> {
        self.lock().get(file_path).map(|entry| entry.diff.clone())
    }

    pub fn is_pending(&self, file_path: &str) -> bool {
        self.lock().contains_key(file_path)
    }

    /// Remember the on-disk text a reject restores. `false` if the diff is already gone.
    pub fn attach_original(&self, file_path: &str, content: String) -> bool {
        match self.lock().get_mut(file_path) {
            Some(entry) => {
                entry.diff.record_original(content);
                true
            }
            None => false,
        }
    }

    pub fn list_pending(&self) -> Vec<PendingDiffView> {
        let mut views: Vec<PendingDiffView> = self
            .lock()
            .values()
            .map(|entry| PendingDiffView {
                file_path: entry.diff.file_path().to_string(),
                session_id: entry.diff.requesting_session().cloned(),
                blocking: entry.diff.is_blocking(),
                created_at: entry.diff.created_at(),
            })
            .collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }

    /// First call for a path wins; later calls return `None` and touch nothing.
    pub async fn resolve(
        &self,
        editor: &mut dyn EditorPort,
        file_path: &str,
        accepted: bool,
    ) -> Option<DiffResolution> {
        let entry = self.lock().remove(file_path)?;
        let view = editor.find_view(file_path).await;
        let resolution = if accepted {
            accept(editor, view.as_ref(), &entry.diff).await
        } else {
            reject(editor, view.as_ref(), &entry.diff).await
        };
        self.deliver(entry, &resolution);
        Some(resolution)
    }

    /// Settle a diff the editor could not show.
    pub fn fail(&self, file_path: &str, error: impl Into<String>) -> Option<DiffResolution> {
        let entry = self.lock().remove(file_path)?;
        let resolution = DiffResolution::failed(error);
        self.deliver(entry, &resolution);
        Some(resolution)
    }

    fn deliver(&self, entry: Entry, resolution: &DiffResolution) {
        let file_path = entry.diff.file_path();
        if let (Some(session_id), Some(notification)) = (
            entry.diff.requesting_session(),
            resolution.notification(file_path),
        ) {
            if let Err(err) = self.registry.enqueue(session_id, notification) {
                debug!(%err, file_path = %file_path, "diff outcome not delivered to session");
            }
        }
        if let Some(waiter) = entry.waiter {
            if waiter.send(resolution.clone()).is_err() {
                debug!(file_path = %file_path, "blocked caller already gone");
            }
        }
        let latency_ms = (Utc::now() - entry.diff.created_at())
            .num_milliseconds()
            .max(0) as f64;
        if let Some(metrics) = &self.metrics {
            metrics.record_diff_resolution(resolution.outcome_label(), latency_ms);
        }
        info!(
            file_path = %file_path,
            outcome = resolution.outcome_label(),
            latency_ms,
            "diff resolved"
        );
    }

    /// Drop every pending diff; blocked callers observe `Abandoned`.
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        drained.len()
    }
}

async fn accept(
    editor: &mut dyn EditorPort,
    view: Option<&ViewHandle>,
    diff: &PendingDiff,
) -> DiffResolution {
    let Some(view) = view else {
        return DiffResolution::failed("view not found during acceptance");
    };
    match editor.persist_content(view, diff.new_content()).await {
        Ok(saved) => DiffResolution::accepted(saved),
        Err(err) => {
            warn!(%err, file_path = %diff.file_path(), "persisting accepted diff failed");
            DiffResolution::failed(err.to_string())
        }
    }
}

async fn reject(
    editor: &mut dyn EditorPort,
    view: Option<&ViewHandle>,
    diff: &PendingDiff,
) -> DiffResolution {
    if let (Some(view), Some(original)) = (view, diff.original_content()) {
        if let Err(err) = editor.restore_content(view, original).await {
            warn!(%err, file_path = %diff.file_path(), "restoring original content failed");
        }
    }
    DiffResolution::rejected()
}
