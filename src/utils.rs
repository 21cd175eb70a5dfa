//! Utility functions and helpers
//!
//! Logging setup and small helpers used throughout the pool.

use crate::Result;
use crate::config::LoggingConfig;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Get current timestamp in seconds since Unix epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Initialize tracing with the configured level, format and sink
///
/// `RUST_LOG` overrides the configured level when set. With a file
/// name configured the log goes under the pool log directory,
/// otherwise to stderr.
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let json = config.format.eq_ignore_ascii_case("json");

    let layer = match &config.file {
        Some(name) => {
            std::fs::create_dir_all(log_dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join(name))?;
            let writer = Mutex::new(file);
            if json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed()
            }
        }
        None => {
            if json {
                fmt::layer().json().with_writer(std::io::stderr).boxed()
            } else {
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .boxed()
            }
        }
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
    Ok(())
}
