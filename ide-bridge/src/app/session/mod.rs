pub mod registry;
pub mod stream;

pub use registry::{DeliveryError, FanOutReport, OpenedSession, SessionRegistry};
pub use stream::session_event_stream;
