use crate::domain::session::SessionId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

pub const DIFF_ACCEPTED_METHOD: &str = "ide/diffAccepted";
pub const DIFF_REJECTED_METHOD: &str = "ide/diffRejected";

/// A proposed edit awaiting review, keyed by file path in the review engine.
#[derive(Clone, Debug)]
pub struct PendingDiff {
    file_path: String,
    requesting_session: Option<SessionId>,
    original_content: Option<String>,
    new_content: String,
    explanation: String,
    blocking: bool,
    created_at: DateTime<Utc>,
}

impl PendingDiff {
    pub fn new(
        file_path: impl Into<String>,
        requesting_session: Option<SessionId>,
        new_content: impl Into<String>,
        explanation: impl Into<String>,
        blocking: bool,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            requesting_session,
            original_content: None,
            new_content: new_content.into(),
            explanation: explanation.into(),
            blocking,
            created_at: Utc::now(),
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn requesting_session(&self) -> Option<&SessionId> {
        self.requesting_session.as_ref()
    }

    /// Content on disk captured when the diff was shown; `None` until the editor has read it.
    pub fn original_content(&self) -> Option<&str> {
        self.original_content.as_deref()
    }

    pub fn new_content(&self) -> &str {
        &self.new_content
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn record_original(&mut self, content: String) {
        self.original_content = Some(content);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Accepted,
    Rejected,
}

/// Outcome handed to a blocked caller, serialized as `{"status": ..., "content"?, "error"?}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiffResolution {
    pub status: ResolutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiffResolution {
    pub fn accepted(content: impl Into<String>) -> Self {
        Self {
            status: ResolutionStatus::Accepted,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn rejected() -> Self {
        Self {
            status: ResolutionStatus::Rejected,
            content: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ResolutionStatus::Rejected,
            content: None,
            error: Some(error.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ResolutionStatus::Accepted
    }

    pub fn outcome_label(&self) -> &'static str {
        match (self.status, self.error.is_some()) {
            (ResolutionStatus::Accepted, _) => "accepted",
            (ResolutionStatus::Rejected, false) => "rejected",
            (ResolutionStatus::Rejected, true) => "failed",
        }
    }

    /// Notification for the requesting session. Failed resolutions notify nobody.
    pub fn notification(&self, file_path: &str) -> Option<Value> {
        match (self.status, &self.error) {
            (ResolutionStatus::Accepted, _) => Some(json!({
                "jsonrpc": "2.0",
                "method": DIFF_ACCEPTED_METHOD,
                "params": {
                    "filePath": file_path,
                    "content": self.content.as_deref().unwrap_or_default(),
                },
            })),
            (ResolutionStatus::Rejected, None) => Some(json!({
                "jsonrpc": "2.0",
                "method": DIFF_REJECTED_METHOD,
                "params": { "filePath": file_path },
            })),
            (ResolutionStatus::Rejected, Some(_)) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "status": "rejected" }))
    }
}
