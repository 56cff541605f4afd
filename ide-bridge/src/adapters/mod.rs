pub mod discovery;
pub mod editor;

pub use discovery::{DiscoveryRecord, DiscoveryStore, IdeInfo};
pub use editor::FsEditorAdapter;
