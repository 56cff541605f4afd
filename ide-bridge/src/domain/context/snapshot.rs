use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const CONTEXT_UPDATE_METHOD: &str = "ide/contextUpdate";

/// 1-based cursor position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub line: u32,
    pub character: u32,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            line: 1,
            character: 1,
        }
    }
}

/// What the editor reports for one open view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenFileState {
    pub path: PathBuf,
    pub is_active: bool,
    pub selection: Option<String>,
    pub cursor: Option<Cursor>,
    /// Last time the view had focus, in epoch milliseconds, when the editor tracks it.
    pub last_accessed_ms: Option<i64>,
}

impl OpenFileState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }

    pub fn with_selection(mut self, text: impl Into<String>) -> Self {
        self.selection = Some(text.into());
        self
    }

    pub fn with_cursor(mut self, line: u32, character: u32) -> Self {
        self.cursor = Some(Cursor { line, character });
        self
    }

    pub fn accessed_at(mut self, epoch_ms: i64) -> Self {
        self.last_accessed_ms = Some(epoch_ms);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFileEntry {
    pub path: String,
    pub timestamp: i64,
    pub is_active: bool,
    pub selected_text: String,
    pub cursor: Cursor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotLimits {
    pub max_files: usize,
    pub max_selection_bytes: usize,
    pub active_boost_ms: i64,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_selection_bytes: 1024,
            active_boost_ms: 1000,
        }
    }
}

/// Ordered view of what the user is looking at, most recent first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    open_files: Vec<OpenFileEntry>,
    is_trusted: bool,
}

impl WorkspaceSnapshot {
    /// Files outside every workspace root are dropped unless active; an empty root list keeps all.
    /// Only the first active file keeps its flag.
    pub fn build(
        files: Vec<OpenFileState>,
        roots: &[PathBuf],
        now_ms: i64,
        limits: SnapshotLimits,
    ) -> Self {
        let mut seen_active = false;
        let mut entries: Vec<OpenFileEntry> = files
            .into_iter()
            .filter(|file| file.is_active || within_roots(&file.path, roots))
            .map(|file| {
                let is_active = file.is_active && !seen_active;
                seen_active |= is_active;
                OpenFileEntry {
                    path: file.path.to_string_lossy().into_owned(),
                    timestamp: file.last_accessed_ms.unwrap_or(now_ms),
                    is_active,
                    selected_text: truncate_utf8(
                        file.selection.as_deref().unwrap_or_default(),
                        limits.max_selection_bytes,
                    ),
                    cursor: file.cursor.unwrap_or_default(),
                }
            })
            .collect();

        let newest_inactive = entries
            .iter()
            .filter(|entry| !entry.is_active)
            .map(|entry| entry.timestamp)
            .max()
            .unwrap_or(now_ms);
        let boost = limits.active_boost_ms.max(1);
        for entry in entries.iter_mut().filter(|entry| entry.is_active) {
            entry.timestamp = newest_inactive.max(entry.timestamp).saturating_add(boost);
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limits.max_files);
        Self {
            open_files: entries,
            is_trusted: true,
        }
    }

    pub fn open_files(&self) -> &[OpenFileEntry] {
        &self.open_files
    }

    pub fn is_empty(&self) -> bool {
        self.open_files.is_empty()
    }

    /// Hash of everything except timestamps, so elapsed time alone never counts as a change.
    pub fn fingerprint(&self) -> String {
        let files: Vec<Value> = self
            .open_files
            .iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "isActive": entry.is_active,
                    "selectedText": entry.selected_text,
                    "cursor": entry.cursor,
                })
            })
            .collect();
        let canonical = json!({
            "workspaceState": { "openFiles": files, "isTrusted": self.is_trusted },
        });
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn to_params(&self) -> Value {
        json!({
            "workspaceState": {
                "openFiles": self.open_files,
                "isTrusted": self.is_trusted,
            }
        })
    }

    pub fn to_notification(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": CONTEXT_UPDATE_METHOD,
            "params": self.to_params(),
        })
    }
}

fn within_roots(path: &Path, roots: &[PathBuf]) -> bool {
    roots.is_empty() || roots.iter().any(|root| path.starts_with(root))
}

fn truncate_utf8(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
