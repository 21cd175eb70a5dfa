//! Grin Stratum protocol
//!
//! Line-delimited JSON-RPC as spoken by grin nodes and grin miners.

mod rpc;
mod types;

pub use rpc::{RpcError, RpcRequest, RpcResponse, StratumMessage};
pub use types::{JobTemplate, LoginParams, SubmitParams, WorkerStatus};

/// Share rejected due to low difficulty
pub const ERR_LOW_DIFFICULTY: i32 = -32501;
/// Failed to validate the solution
pub const ERR_INVALID_SOLUTION: i32 = -32502;
/// Solution submitted for a stale job
pub const ERR_STALE_SOLUTION: i32 = -32503;
/// Malformed request
pub const ERR_INVALID_REQUEST: i32 = -32600;
/// Unknown method
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
/// Node is still syncing
pub const ERR_NODE_SYNCING: i32 = -32701;
