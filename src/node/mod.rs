//! Upstream grin node integration
//!
//! The pool talks to the node on two surfaces: the owner API over HTTP
//! for health and chain status, and the node's own Stratum port for
//! work templates and share submission.

pub mod api;
pub mod stratum;

pub use api::{NodeApiClient, NodeStatus, NodeTip};
pub use stratum::NodeClient;
