pub mod context;
pub mod diff;
pub mod editor;
pub mod rpc;
pub mod session;
