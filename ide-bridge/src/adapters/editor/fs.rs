use crate::domain::context::{Cursor, OpenFileState};
use crate::domain::diff::DiffSpan;
use crate::ports::editor::{review_channel, EditorError, EditorPort, ReviewActions, ViewHandle};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Views kept before the least recently touched idle one is dropped.
const MAX_VIEWS: usize = 64;

#[derive(Debug)]
struct ViewState {
    id: u64,
    staged: Option<String>,
    highlights: Vec<DiffSpan>,
    cursor: Cursor,
    last_accessed_ms: i64,
    touched: u64,
}

/// Headless editor host backed by the local filesystem.
///
/// Views are bookkeeping only: staged text lives in memory until persisted. The review UI
/// produces no gestures; reviews are decided through the bridge's HTTP review endpoints.
#[derive(Debug)]
pub struct FsEditorAdapter {
    views: HashMap<String, ViewState>,
    active: Option<String>,
    next_id: u64,
    clock: u64,
    view_limit: usize,
}

impl Default for FsEditorAdapter {
    fn default() -> Self {
        Self::with_view_limit(MAX_VIEWS)
    }
}

impl FsEditorAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view_limit(view_limit: usize) -> Self {
        Self {
            views: HashMap::new(),
            active: None,
            next_id: 0,
            clock: 0,
            view_limit: view_limit.max(1),
        }
    }

    pub fn staged(&self, path: &str) -> Option<&str> {
        self.views.get(path).and_then(|view| view.staged.as_deref())
    }

    pub fn highlights(&self, path: &str) -> &[DiffSpan] {
        self.views
            .get(path)
            .map(|view| view.highlights.as_slice())
            .unwrap_or_default()
    }

    pub fn close_view(&mut self, path: &str) -> bool {
        if self.active.as_deref() == Some(path) {
            self.active = None;
        }
        self.views.remove(path).is_some()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Drop least recently touched views over the limit. Views with staged text are under
    /// review and stay.
    fn evict_idle(&mut self, keep: &str) {
        while self.views.len() > self.view_limit {
            let victim = self
                .views
                .iter()
                .filter(|(path, view)| path.as_str() != keep && view.staged.is_none())
                .min_by_key(|(_, view)| view.touched)
                .map(|(path, _)| path.clone());
            let Some(victim) = victim else {
                break;
            };
            debug!(file_path = %victim, "evicting idle view");
            self.close_view(&victim);
        }
    }

    fn view_mut(&mut self, view: &ViewHandle) -> Result<&mut ViewState, EditorError> {
        match self.views.get_mut(&view.path) {
            Some(state) if state.id == view.id => Ok(state),
            _ => Err(EditorError::NotFound(view.path.clone())),
        }
    }
}

#[async_trait]
impl EditorPort for FsEditorAdapter {
    fn id(&self) -> &str {
        "fs"
    }

    async fn open_file(&mut self, path: &str) -> Result<ViewHandle, EditorError> {
        let now = Utc::now().timestamp_millis();
        let touched = self.tick();
        let next_id = self.next_id + 1;
        let view = self.views.entry(path.to_string()).or_insert_with(|| ViewState {
            id: next_id,
            staged: None,
            highlights: Vec::new(),
            cursor: Cursor::default(),
            last_accessed_ms: now,
            touched,
        });
        let created = view.id == next_id;
        view.last_accessed_ms = now;
        view.touched = touched;
        let handle = ViewHandle {
            id: view.id,
            path: path.to_string(),
        };
        if created {
            self.next_id = next_id;
            self.evict_idle(path);
        }
        self.active = Some(path.to_string());
        debug!(file_path = %path, view_id = handle.id, "view opened");
        Ok(handle)
    }

    async fn find_view(&mut self, path: &str) -> Option<ViewHandle> {
        self.views.get(path).map(|view| ViewHandle {
            id: view.id,
            path: path.to_string(),
        })
    }

    async fn read_content(&mut self, view: &ViewHandle) -> Result<String, EditorError> {
        self.view_mut(view)?;
        match fs::read_to_string(&view.path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(EditorError::io(&view.path, err)),
        }
    }

    async fn stage_content(&mut self, view: &ViewHandle, text: &str) -> Result<(), EditorError> {
        self.view_mut(view)?.staged = Some(text.to_string());
        Ok(())
    }

    async fn highlight(&mut self, view: &ViewHandle, spans: &[DiffSpan]) -> Result<(), EditorError> {
        self.view_mut(view)?.highlights = spans.to_vec();
        Ok(())
    }

    async fn reveal(
        &mut self,
        view: &ViewHandle,
        line: usize,
        character: usize,
    ) -> Result<(), EditorError> {
        let touched = self.tick();
        let state = self.view_mut(view)?;
        state.cursor = Cursor {
            line: u32::try_from(line + 1).unwrap_or(u32::MAX),
            character: u32::try_from(character + 1).unwrap_or(u32::MAX),
        };
        state.last_accessed_ms = Utc::now().timestamp_millis();
        state.touched = touched;
        self.active = Some(view.path.clone());
        Ok(())
    }

    async fn render_review_ui(
        &mut self,
        view: &ViewHandle,
        _explanation: &str,
    ) -> Result<ReviewActions, EditorError> {
        self.view_mut(view)?;
        let (_gestures, rx) = review_channel(1);
        Ok(rx)
    }

    async fn persist_content(
        &mut self,
        view: &ViewHandle,
        text: &str,
    ) -> Result<String, EditorError> {
        self.view_mut(view)?;
        if let Some(parent) = Path::new(&view.path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|err| EditorError::io(&view.path, err))?;
            }
        }
        fs::write(&view.path, text)
            .await
            .map_err(|err| EditorError::io(&view.path, err))?;
        let state = self.view_mut(view)?;
        state.staged = None;
        state.highlights.clear();
        Ok(text.to_string())
    }

    async fn restore_content(&mut self, view: &ViewHandle, _text: &str) -> Result<(), EditorError> {
        let state = self.view_mut(view)?;
        state.staged = None;
        state.highlights.clear();
        Ok(())
    }

    async fn query_open_files(&mut self) -> Result<Vec<OpenFileState>, EditorError> {
        let mut files = Vec::with_capacity(self.views.len());
        for (path, view) in &self.views {
            if fs::metadata(path).await.is_err() {
                continue;
            }
            files.push(OpenFileState {
                path: path.into(),
                is_active: self.active.as_deref() == Some(path.as_str()),
                selection: None,
                cursor: Some(view.cursor),
                last_accessed_ms: Some(view.last_accessed_ms),
            });
        }
        Ok(files)
    }
}
