//! Share-log publishing
//!
//! Accepted and rejected shares are published as fixed-layout records
//! to a Kafka cluster, routed by the proof's edge-bits.

mod kafka;
mod share;

pub use kafka::{KafkaShareLog, ProducerOptions};
pub use share::{FULLNAME_LIMIT, Share, SubmitResult};

use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Sink for share-log records
#[async_trait]
pub trait ShareSink: Send + Sync {
    /// Queue one record for publishing
    async fn publish(&self, edge_bits: u32, share: Share) -> Result<()>;
}

/// Sink used when producing is disabled
pub struct NullShareSink;

#[async_trait]
impl ShareSink for NullShareSink {
    async fn publish(&self, _edge_bits: u32, _share: Share) -> Result<()> {
        Ok(())
    }
}

/// Channel-backed sink feeding the blocking kafka task
struct KafkaShareSink {
    tx: mpsc::Sender<(u32, Share)>,
}

#[async_trait]
impl ShareSink for KafkaShareSink {
    async fn publish(&self, edge_bits: u32, share: Share) -> Result<()> {
        self.tx
            .send((edge_bits, share))
            .await
            .map_err(|e| Error::channel_send(format!("share log: {}", e)))
    }
}

/// Start the share-log producer
///
/// The kafka client is synchronous, so records are funneled over a
/// channel to a dedicated blocking task. Returns a no-op sink when
/// producing is disabled.
pub fn start(config: &ProducerConfig) -> Arc<dyn ShareSink> {
    if !config.enabled {
        warn!("Share logging is disabled");
        return Arc::new(NullShareSink);
    }

    let (tx, mut rx) = mpsc::channel::<(u32, Share)>(1024);
    let cfg = config.clone();

    tokio::task::spawn_blocking(move || {
        let mut log = match KafkaShareLog::from_config(&cfg) {
            Ok(log) => log,
            Err(e) => {
                error!("Share log producer failed to start: {}", e);
                return;
            }
        };

        while let Some((edge_bits, share)) = rx.blocking_recv() {
            if let Err(e) = log.send(edge_bits, &share) {
                error!("Failed to publish share log record: {}", e);
            }
        }
    });

    Arc::new(KafkaShareSink { tx })
}
