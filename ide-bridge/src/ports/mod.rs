pub mod editor;

pub use editor::{review_channel, EditorError, EditorPort, ReviewActions, ViewHandle};
