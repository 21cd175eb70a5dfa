//! Upstream node Stratum connection
//!
//! One logical connection to the grin node: the pool logs in with its
//! own credentials, receives work templates, relays worker shares and
//! matches the node's submit responses back to the originating worker.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::{ShareSubmission, SubmitOutcome, SubmitReply};
use crate::producer::{Share, ShareSink, SubmitResult};
use crate::protocol::{
    ERR_NODE_SYNCING, ERR_STALE_SOLUTION, JobTemplate, LoginParams, RpcError, RpcRequest,
    RpcResponse, StratumMessage, SubmitParams,
};
use crate::utils::current_timestamp;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, tcp::OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

/// A share relayed upstream, waiting for the node's verdict
struct PendingShare {
    rpc_id: String,
    worker_id: i32,
    fullname: String,
    worker_addr: String,
    difficulty: u64,
    edge_bits: u32,
    job_id: u64,
    height: u64,
    reply: mpsc::Sender<SubmitReply>,
}

/// Correlation id for an upstream submit request
///
/// Encodes enough to identify the share even across a reconnect, in
/// the same form the rest of the grin-pool stack expects.
fn submit_key(worker_id: i32, params: &SubmitParams) -> String {
    BASE64.encode(format!("{}+{}", worker_id, params.as_string()).as_bytes())
}

/// Client for the node's Stratum port
pub struct NodeClient {
    id: String,
    config: Arc<Config>,
    job_tx: broadcast::Sender<JobTemplate>,
    current_job: Arc<parking_lot::RwLock<Option<JobTemplate>>>,
    pending: DashMap<String, PendingShare>,
    sink: Arc<dyn ShareSink>,
}

impl NodeClient {
    /// Create a new upstream client
    pub fn new(
        config: Arc<Config>,
        job_tx: broadcast::Sender<JobTemplate>,
        current_job: Arc<parking_lot::RwLock<Option<JobTemplate>>>,
        sink: Arc<dyn ShareSink>,
    ) -> Self {
        Self {
            id: format!("Pool-{}", config.server.id),
            config,
            job_tx,
            current_job,
            pending: DashMap::new(),
            sink,
        }
    }

    /// Connect and serve forever, reconnecting on failure
    pub async fn run(self, mut submit_rx: mpsc::Receiver<ShareSubmission>) -> Result<()> {
        let reconnect = Duration::from_secs(self.config.grin_node.reconnect_secs);
        loop {
            match self.serve(&mut submit_rx).await {
                Ok(()) => {
                    // All submitters are gone, the pool is shutting down
                    return Ok(());
                }
                Err(e) => {
                    error!("{} - Upstream connection lost: {}", self.id, e);
                    self.fail_pending();
                    tokio::time::sleep(reconnect).await;
                }
            }
        }
    }

    /// One connection lifetime
    async fn serve(&self, submit_rx: &mut mpsc::Receiver<ShareSubmission>) -> Result<()> {
        let node = &self.config.grin_node;
        let url = format!("{}:{}", node.address, node.stratum_port);
        warn!("{} - Connecting to upstream stratum server at {}", self.id, url);

        let stream = TcpStream::connect(&url).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        self.log_in(&mut writer).await?;
        self.request_job(&mut writer).await?;

        let mut keepalive = interval(Duration::from_secs(node.keepalive_secs));
        keepalive.reset();

        loop {
            let mut line = String::new();

            tokio::select! {
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => return Err(Error::upstream("Connection closed by node")),
                        Ok(_) => self.handle_line(&line).await?,
                        Err(e) => return Err(e.into()),
                    }
                }

                submission = submit_rx.recv() => {
                    match submission {
                        Some(submission) => self.forward(&mut writer, submission).await?,
                        None => return Ok(()),
                    }
                }

                _ = keepalive.tick() => {
                    debug!("{} - Sending keepalive", self.id);
                    self.send_request(&mut writer, "keepalive", None, &self.id).await?;
                }
            }
        }
    }

    /// Send our login to the node
    async fn log_in(&self, writer: &mut OwnedWriteHalf) -> Result<()> {
        let node = &self.config.grin_node;
        let params = LoginParams {
            login: node.login.clone(),
            pass: node.password.clone(),
            agent: self.id.clone(),
        };
        debug!("{} - Requesting login", self.id);
        self.send_request(writer, "login", Some(serde_json::to_value(params)?), &self.id)
            .await
    }

    /// Ask for a fresh work template
    async fn request_job(&self, writer: &mut OwnedWriteHalf) -> Result<()> {
        debug!("{} - Requesting job template", self.id);
        self.send_request(writer, "getjobtemplate", None, &self.id).await
    }

    /// Relay one worker share upstream
    async fn forward(&self, writer: &mut OwnedWriteHalf, sub: ShareSubmission) -> Result<()> {
        let key = submit_key(sub.worker_id, &sub.params);
        debug!("{} - Submitting a share for worker {}", self.id, sub.worker_id);

        self.pending.insert(
            key.clone(),
            PendingShare {
                rpc_id: sub.rpc_id,
                worker_id: sub.worker_id,
                fullname: sub.fullname,
                worker_addr: sub.worker_addr,
                difficulty: sub.difficulty,
                edge_bits: sub.params.edge_bits,
                job_id: sub.params.job_id,
                height: sub.params.height,
                reply: sub.reply,
            },
        );

        self.send_request(writer, "submit", Some(serde_json::to_value(&sub.params)?), &key)
            .await
    }

    async fn send_request(
        &self,
        writer: &mut OwnedWriteHalf,
        method: &str,
        params: Option<serde_json::Value>,
        id: &str,
    ) -> Result<()> {
        let request = RpcRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Process one line from the node
    async fn handle_line(&self, line: &str) -> Result<()> {
        trace!("{} - Got message from upstream: {:?}", self.id, line.trim_end());

        match StratumMessage::from_json(line) {
            Ok(StratumMessage::Request(req)) => self.handle_request(req),
            Ok(StratumMessage::Response(res)) => self.handle_response(res).await,
            Err(e) => {
                debug!("{} - Unparseable message from node: {}", self.id, e);
                Ok(())
            }
        }
    }

    /// Requests pushed by the node (new jobs)
    fn handle_request(&self, req: RpcRequest) -> Result<()> {
        match req.method.as_str() {
            "job" => {
                let job: JobTemplate = match req.params.and_then(|p| serde_json::from_value(p).ok())
                {
                    Some(job) => job,
                    None => {
                        debug!("{} - Malformed job from node", self.id);
                        return Ok(());
                    }
                };
                debug!(
                    "{} - New job for height {} job_id {} difficulty {}",
                    self.id, job.height, job.job_id, job.difficulty
                );
                self.set_job(job);
                Ok(())
            }
            method => {
                debug!("{} - Unknown request type from node: {}", self.id, method);
                Ok(())
            }
        }
    }

    /// Responses to requests we made
    async fn handle_response(&self, res: RpcResponse) -> Result<()> {
        match res.method.as_str() {
            "login" => match res.result {
                Some(_) => {
                    info!("{} - Logged in to upstream node", self.id);
                    Ok(())
                }
                None => {
                    let err = res
                        .rpc_error()
                        .unwrap_or_else(|| RpcError::new(-1, "Login rejected"));
                    Err(Error::upstream(format!("Login failed: {}", err)))
                }
            },

            "getjobtemplate" => match res.result {
                Some(value) => {
                    let job: JobTemplate = serde_json::from_value(value)?;
                    debug!("{} - Received job for height {}", self.id, job.height);
                    self.set_job(job);
                    Ok(())
                }
                None => {
                    let err = res
                        .rpc_error()
                        .unwrap_or_else(|| RpcError::new(-1, "Empty job response"));
                    if err.code == ERR_NODE_SYNCING {
                        warn!("{} - Node is still syncing", self.id);
                        Ok(())
                    } else {
                        Err(Error::upstream(format!("Job request failed: {}", err)))
                    }
                }
            },

            "submit" => {
                self.resolve_submit(res).await;
                Ok(())
            }

            "keepalive" | "status" => Ok(()),

            method => {
                debug!("{} - Unknown response type from node: {}", self.id, method);
                Ok(())
            }
        }
    }

    /// Store and broadcast a new work template
    fn set_job(&self, job: JobTemplate) {
        *self.current_job.write() = Some(job.clone());
        // No receivers is fine, workers may not be connected yet
        let _ = self.job_tx.send(job);
    }

    /// Match a submit response to its pending share and classify it
    async fn resolve_submit(&self, res: RpcResponse) {
        let (_, pending) = match self.pending.remove(&res.id) {
            Some(entry) => entry,
            None => {
                debug!("{} - Submit response for unknown share: {}", self.id, res.id);
                return;
            }
        };

        let (outcome, result) = match res.result {
            Some(value) => {
                // "ok" for a plain share, "blockfound - <hash>" when the
                // share also solved the block
                if let Some(text) = value.as_str() {
                    if text.starts_with("block") {
                        info!(
                            "{} - Block found at height {} by {}",
                            self.id, pending.height, pending.fullname
                        );
                    }
                }
                debug!("{} - Node accepted share from worker {}", self.id, pending.worker_id);
                (SubmitOutcome::Accepted, SubmitResult::Accept)
            }
            None => {
                let err = res
                    .rpc_error()
                    .unwrap_or_else(|| RpcError::new(-1, "Share rejected"));
                if err.code == ERR_STALE_SOLUTION {
                    debug!("{} - Node rejected share as stale", self.id);
                    (SubmitOutcome::Stale(err), SubmitResult::Reject)
                } else {
                    debug!("{} - Node rejected share: {}", self.id, err);
                    (SubmitOutcome::Rejected(err), SubmitResult::Reject)
                }
            }
        };

        let share = Share::new(
            pending.job_id,
            self.config.server.id,
            &pending.worker_addr,
            pending.worker_id,
            pending.difficulty,
            &pending.fullname,
            result,
            pending.height as i32,
            current_timestamp() as u32,
        );
        if let Err(e) = self.sink.publish(pending.edge_bits, share).await {
            warn!("{} - Failed to queue share log record: {}", self.id, e);
        }

        // The worker may have disconnected in the meantime
        let _ = pending
            .reply
            .send(SubmitReply {
                rpc_id: pending.rpc_id.clone(),
                outcome,
            })
            .await;
    }

    /// Drop all in-flight shares after a lost connection
    fn fail_pending(&self) {
        if !self.pending.is_empty() {
            warn!(
                "{} - Dropping {} in-flight shares after reconnect",
                self.id,
                self.pending.len()
            );
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_key_roundtrip() {
        let params = SubmitParams {
            height: 12345,
            job_id: 6,
            edge_bits: 31,
            nonce: 777,
            pow: vec![],
        };
        let key = submit_key(42, &params);
        let decoded = String::from_utf8(BASE64.decode(&key).unwrap()).unwrap();
        assert_eq!(decoded, "42+12345+6+777+31");
    }

    #[test]
    fn test_submit_keys_are_distinct() {
        let params = SubmitParams {
            height: 1,
            job_id: 1,
            edge_bits: 29,
            nonce: 1,
            pow: vec![],
        };
        let a = submit_key(1, &params);
        let b = submit_key(2, &params);
        assert_ne!(a, b);
    }
}
