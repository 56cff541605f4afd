pub mod dispatcher;
pub mod model;

pub use dispatcher::{BridgeTool, DispatcherConfig, RpcDispatcher};
pub use model::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcError};
