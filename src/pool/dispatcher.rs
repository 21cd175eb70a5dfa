//! Share validation and dispatch
//!
//! Every submitted share passes through the dispatcher before it is
//! relayed upstream: stale jobs, duplicate nonces and under-difficulty
//! proofs are cut off here and logged as rejected shares.

use crate::error::{Error, Result};
use crate::pool::difficulty::share_difficulty;
use crate::producer::{Share, ShareSink, SubmitResult};
use crate::protocol::{
    ERR_INVALID_SOLUTION, ERR_LOW_DIFFICULTY, ERR_STALE_SOLUTION, JobTemplate, RpcError,
    SubmitParams,
};
use crate::utils::current_timestamp;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A share in flight to the upstream node
pub struct ShareSubmission {
    /// Downstream request id, echoed back in the final response
    pub rpc_id: String,
    /// Pool-local numeric worker id
    pub worker_id: i32,
    /// Worker fullname
    pub fullname: String,
    /// Worker remote address
    pub worker_addr: String,
    /// Session share difficulty
    pub difficulty: u64,
    /// The solution itself
    pub params: SubmitParams,
    /// Channel the classified outcome is delivered on
    pub reply: mpsc::Sender<SubmitReply>,
}

/// Classified outcome of an upstream submission
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The node accepted the share
    Accepted,
    /// The share arrived too late
    Stale(RpcError),
    /// The node rejected the share
    Rejected(RpcError),
}

/// Outcome delivered back to the worker session
#[derive(Debug, Clone)]
pub struct SubmitReply {
    /// Downstream request id to respond to
    pub rpc_id: String,
    /// What happened upstream
    pub outcome: SubmitOutcome,
}

/// Result of local validation
pub enum DispatchResult {
    /// Share forwarded upstream; the reply arrives asynchronously
    Forwarded,
    /// Share cut off locally
    Rejected(RpcError),
}

/// Validates shares and routes them upstream and to the share log
pub struct ShareDispatcher {
    server_id: u16,
    current_job: Arc<RwLock<Option<JobTemplate>>>,
    /// Nonces already seen for the current job
    seen_nonces: Mutex<SeenNonces>,
    sink: Arc<dyn ShareSink>,
    submit_tx: mpsc::Sender<ShareSubmission>,
    /// Edge-bits with a configured share-log topic, None when logging is off
    accepted_edge_bits: Option<Vec<u32>>,
}

struct SeenNonces {
    job_id: u64,
    nonces: HashSet<u64>,
}

impl ShareDispatcher {
    /// Create a dispatcher
    pub fn new(
        server_id: u16,
        current_job: Arc<RwLock<Option<JobTemplate>>>,
        sink: Arc<dyn ShareSink>,
        submit_tx: mpsc::Sender<ShareSubmission>,
        accepted_edge_bits: Option<Vec<u32>>,
    ) -> Self {
        Self {
            server_id,
            current_job,
            seen_nonces: Mutex::new(SeenNonces {
                job_id: 0,
                nonces: HashSet::new(),
            }),
            sink,
            submit_tx,
            accepted_edge_bits,
        }
    }

    /// Validate one submission; forward it upstream if it passes
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        rpc_id: String,
        worker_id: i32,
        fullname: String,
        worker_addr: String,
        session_difficulty: u64,
        params: SubmitParams,
        reply: mpsc::Sender<SubmitReply>,
    ) -> Result<DispatchResult> {
        let job = self.current_job.read().clone();
        let job = match job {
            Some(job) => job,
            None => {
                return Ok(DispatchResult::Rejected(RpcError::new(
                    ERR_STALE_SOLUTION,
                    "No current job",
                )));
            }
        };

        // Stale: the solution is for an older job or height
        if params.job_id != job.job_id || params.height != job.height {
            debug!(
                worker_id,
                share_height = params.height,
                job_height = job.height,
                "Stale share"
            );
            self.log_rejected(&params, worker_id, &fullname, &worker_addr, session_difficulty)
                .await;
            return Ok(DispatchResult::Rejected(RpcError::new(
                ERR_STALE_SOLUTION,
                "Solution submitted too late",
            )));
        }

        // Unknown proof size: nowhere to route the share log record
        if let Some(accepted) = &self.accepted_edge_bits {
            if !accepted.contains(&params.edge_bits) {
                warn!(worker_id, edge_bits = params.edge_bits, "Unsupported edge bits");
                return Ok(DispatchResult::Rejected(RpcError::new(
                    ERR_INVALID_SOLUTION,
                    "Failed to validate solution",
                )));
            }
        }

        // Duplicate nonce for this job
        let duplicate = {
            let mut seen = self.seen_nonces.lock();
            if seen.job_id != job.job_id {
                seen.job_id = job.job_id;
                seen.nonces.clear();
            }
            !seen.nonces.insert(params.nonce)
        };
        if duplicate {
            debug!(worker_id, nonce = params.nonce, "Duplicate share");
            self.log_rejected(&params, worker_id, &fullname, &worker_addr, session_difficulty)
                .await;
            return Ok(DispatchResult::Rejected(RpcError::new(
                ERR_INVALID_SOLUTION,
                "Failed to validate solution",
            )));
        }

        // Port difficulty gate
        let diff = share_difficulty(&params.pow);
        if diff < session_difficulty {
            debug!(
                worker_id,
                share_difficulty = diff,
                required = session_difficulty,
                "Low difficulty share"
            );
            self.log_rejected(&params, worker_id, &fullname, &worker_addr, session_difficulty)
                .await;
            return Ok(DispatchResult::Rejected(RpcError::new(
                ERR_LOW_DIFFICULTY,
                "Share rejected due to low difficulty",
            )));
        }

        let submission = ShareSubmission {
            rpc_id,
            worker_id,
            fullname,
            worker_addr,
            difficulty: session_difficulty,
            params,
            reply,
        };
        self.submit_tx
            .send(submission)
            .await
            .map_err(|e| Error::channel_send(format!("upstream submit: {}", e)))?;

        Ok(DispatchResult::Forwarded)
    }

    /// Log a locally rejected share
    async fn log_rejected(
        &self,
        params: &SubmitParams,
        worker_id: i32,
        fullname: &str,
        worker_addr: &str,
        difficulty: u64,
    ) {
        let share = Share::new(
            params.job_id,
            self.server_id,
            worker_addr,
            worker_id,
            difficulty,
            fullname,
            SubmitResult::Reject,
            params.height as i32,
            current_timestamp() as u32,
        );
        if let Err(e) = self.sink.publish(params.edge_bits, share).await {
            warn!("Failed to queue rejected share log record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::NullShareSink;

    fn test_job() -> JobTemplate {
        JobTemplate {
            height: 100,
            job_id: 5,
            difficulty: 1,
            pre_pow: String::new(),
        }
    }

    fn test_params(nonce: u64) -> SubmitParams {
        SubmitParams {
            height: 100,
            job_id: 5,
            edge_bits: 31,
            nonce,
            pow: (0..42).collect(),
        }
    }

    fn dispatcher(
        job: Option<JobTemplate>,
    ) -> (ShareDispatcher, mpsc::Receiver<ShareSubmission>) {
        let (submit_tx, submit_rx) = mpsc::channel(8);
        let dispatcher = ShareDispatcher::new(
            1,
            Arc::new(RwLock::new(job)),
            Arc::new(NullShareSink),
            submit_tx,
            Some(vec![29, 31]),
        );
        (dispatcher, submit_rx)
    }

    async fn submit(
        dispatcher: &ShareDispatcher,
        params: SubmitParams,
        difficulty: u64,
    ) -> DispatchResult {
        let (reply_tx, _reply_rx) = mpsc::channel(1);
        dispatcher
            .submit(
                "1".to_string(),
                0,
                "alice.rig1".to_string(),
                "10.0.0.1:51234".to_string(),
                difficulty,
                params,
                reply_tx,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_share_is_forwarded() {
        let (dispatcher, mut submit_rx) = dispatcher(Some(test_job()));
        let result = submit(&dispatcher, test_params(1), 1).await;
        assert!(matches!(result, DispatchResult::Forwarded));

        let forwarded = submit_rx.recv().await.unwrap();
        assert_eq!(forwarded.params.nonce, 1);
        assert_eq!(forwarded.fullname, "alice.rig1");
    }

    #[tokio::test]
    async fn test_stale_share_rejected() {
        let (dispatcher, _rx) = dispatcher(Some(test_job()));
        let mut params = test_params(1);
        params.job_id = 4;
        match submit(&dispatcher, params, 1).await {
            DispatchResult::Rejected(err) => assert_eq!(err.code, ERR_STALE_SOLUTION),
            _ => panic!("expected stale rejection"),
        }
    }

    #[tokio::test]
    async fn test_no_job_rejects() {
        let (dispatcher, _rx) = dispatcher(None);
        match submit(&dispatcher, test_params(1), 1).await {
            DispatchResult::Rejected(err) => assert_eq!(err.code, ERR_STALE_SOLUTION),
            _ => panic!("expected rejection without a job"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_nonce_rejected() {
        let (dispatcher, mut submit_rx) = dispatcher(Some(test_job()));
        assert!(matches!(
            submit(&dispatcher, test_params(7), 1).await,
            DispatchResult::Forwarded
        ));
        submit_rx.recv().await.unwrap();

        match submit(&dispatcher, test_params(7), 1).await {
            DispatchResult::Rejected(err) => assert_eq!(err.code, ERR_INVALID_SOLUTION),
            _ => panic!("expected duplicate rejection"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_edge_bits_rejected() {
        let (dispatcher, _rx) = dispatcher(Some(test_job()));
        let mut params = test_params(1);
        params.edge_bits = 30;
        match submit(&dispatcher, params, 1).await {
            DispatchResult::Rejected(err) => assert_eq!(err.code, ERR_INVALID_SOLUTION),
            _ => panic!("expected edge-bits rejection"),
        }
    }

    #[tokio::test]
    async fn test_low_difficulty_rejected() {
        let (dispatcher, _rx) = dispatcher(Some(test_job()));
        match submit(&dispatcher, test_params(1), u64::MAX).await {
            DispatchResult::Rejected(err) => assert_eq!(err.code, ERR_LOW_DIFFICULTY),
            _ => panic!("expected low-difficulty rejection"),
        }
    }

    #[tokio::test]
    async fn test_empty_proof_rejected() {
        let (dispatcher, _rx) = dispatcher(Some(test_job()));
        let mut params = test_params(1);
        params.pow.clear();
        match submit(&dispatcher, params, 1).await {
            DispatchResult::Rejected(err) => assert_eq!(err.code, ERR_LOW_DIFFICULTY),
            _ => panic!("expected empty-proof rejection"),
        }
    }
}
