pub mod aggregate;
pub mod events;
pub mod value_object;

pub use aggregate::Session;
pub use events::{CloseReason, SessionEvent, SessionEventEnvelope};
pub use value_object::{AuthError, AuthToken, SessionId};
