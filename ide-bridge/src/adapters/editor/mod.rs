pub mod fs;

pub use fs::FsEditorAdapter;
