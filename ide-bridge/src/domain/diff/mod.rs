pub mod aggregate;
pub mod value_object;

pub use aggregate::{DiffResolution, PendingDiff, ResolutionStatus};
pub use value_object::{DiffSpan, ReviewAction, SpanKind};
