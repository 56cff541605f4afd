use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Insert,
    Delete,
    Replace,
}

/// One changed hunk between the original and the proposed text, in 0-based line ranges.
///
/// `old_lines` indexes the original text, `new_lines` the proposed text. Pure inserts have an
/// empty `old_lines` range positioned where the insertion lands; pure deletes the mirror.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSpan {
    pub kind: SpanKind,
    pub old_lines: Range<usize>,
    pub new_lines: Range<usize>,
}

impl DiffSpan {
    /// Line in the proposed text the editor should scroll to for this span.
    pub fn anchor_line(&self) -> usize {
        self.new_lines.start
    }
}

/// Reviewer gesture delivered from the review UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewAction {
    Accept,
    Reject,
    Next,
    Prev,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Accept => "accept",
            ReviewAction::Reject => "reject",
            ReviewAction::Next => "next",
            ReviewAction::Prev => "prev",
        }
    }

    pub fn is_decision(&self) -> bool {
        matches!(self, ReviewAction::Accept | ReviewAction::Reject)
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(ReviewAction::Accept),
            "reject" => Ok(ReviewAction::Reject),
            "next" => Ok(ReviewAction::Next),
            "prev" | "previous" => Ok(ReviewAction::Prev),
            other => Err(format!("unknown review action {other:?}")),
        }
    }
}
