//! Grin Pool Stratum Server
//!
//! An async Stratum mining-pool front end for Grin supporting:
//! - Per-port worker difficulty tiers
//! - Share validation with duplicate and stale detection
//! - Share relay to an upstream grin node over its Stratum port
//! - Share-log publication to Kafka, partitioned by proof size
//! - Node health checks over the owner HTTP API

pub mod config;
pub mod error;
pub mod node;
pub mod pool;
pub mod producer;
pub mod protocol;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};

/// Application information
pub const APP_NAME: &str = "grin-pool-stratum";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
