pub mod handle;
pub mod main_loop;

pub use handle::{EditorCommand, EditorHandle};
pub use main_loop::{spawn_editor_loop, EditorLoop, EditorLoopConfig};
