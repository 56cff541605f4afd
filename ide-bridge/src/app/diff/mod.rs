pub mod alignment;
pub mod service;

pub use alignment::align_lines;
pub use service::{DiffError, DiffReviewService, OpenDiffOutcome, OpenDiffRequest, PendingDiffView};
