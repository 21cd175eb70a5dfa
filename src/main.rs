//! Grin Pool Stratum Server - Main Application
//!
//! Wires the worker-facing pool server, the upstream node connection
//! and the share-log producer together.

use clap::Parser;
use grin_pool_stratum::{
    APP_NAME, APP_VERSION, Config, Result,
    config::Args,
    node::{NodeApiClient, NodeClient},
    pool::{PoolServer, ShareDispatcher, ShareSubmission},
    producer,
    protocol::JobTemplate,
    utils,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(Config::from_args(args)?);

    utils::init_logging(&config.logging, &config.grin_pool.log_dir)?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: server_id={}, node={}:{}, worker ports={:?}",
        config.server.id,
        config.grin_node.address,
        config.grin_node.stratum_port,
        config
            .workers
            .port_difficulty
            .iter()
            .map(|wp| wp.port)
            .collect::<Vec<_>>()
    );

    // Startup health probe, the stratum connection retries on its own
    let api = NodeApiClient::new(&config.grin_node)?;
    match api.get_status().await {
        Ok(status) => info!(
            "Node is up at height {} with {} peers",
            status.tip.height, status.connections
        ),
        Err(e) => warn!("Node owner API not reachable yet: {}", e),
    }

    // Periodic liveness logging through the owner API
    let status_handle = tokio::spawn(async move {
        let mut probe = tokio::time::interval(std::time::Duration::from_secs(60));
        probe.tick().await;
        loop {
            probe.tick().await;
            if let Err(e) = api.get_status().await {
                warn!("Node owner API check failed: {}", e);
            }
        }
    });

    let sink = producer::start(&config.producer);

    let (job_tx, _) = broadcast::channel::<JobTemplate>(16);
    let current_job = Arc::new(parking_lot::RwLock::new(None));
    let (submit_tx, submit_rx) = mpsc::channel::<ShareSubmission>(256);

    // Only proof sizes with a share-log topic are worth relaying
    let accepted_edge_bits = if config.producer.enabled {
        Some(
            config
                .producer
                .topics
                .keys()
                .filter_map(|k| k.parse().ok())
                .collect(),
        )
    } else {
        None
    };

    let dispatcher = Arc::new(ShareDispatcher::new(
        config.server.id,
        Arc::clone(&current_job),
        Arc::clone(&sink),
        submit_tx,
        accepted_edge_bits,
    ));

    let node_client = NodeClient::new(
        Arc::clone(&config),
        job_tx.clone(),
        Arc::clone(&current_job),
        Arc::clone(&sink),
    );
    let node_handle = tokio::spawn(async move {
        if let Err(e) = node_client.run(submit_rx).await {
            error!("Upstream node client stopped: {}", e);
        }
    });

    let server = PoolServer::new(config, dispatcher, job_tx, current_job);
    let result = server.run().await;

    node_handle.abort();
    status_handle.abort();
    info!("Shutting down");
    result
}
