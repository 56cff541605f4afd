pub mod broadcaster;

pub use broadcaster::{BroadcastOutcome, ContextBroadcaster, SkipReason};
