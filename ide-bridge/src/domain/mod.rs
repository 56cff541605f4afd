pub mod context;
pub mod diff;
pub mod session;
