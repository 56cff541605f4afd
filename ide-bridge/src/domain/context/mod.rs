pub mod snapshot;

pub use snapshot::{Cursor, OpenFileEntry, OpenFileState, SnapshotLimits, WorkspaceSnapshot};
