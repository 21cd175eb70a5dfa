//! Worker listener and per-connection handling
//!
//! One TCP listener per configured worker port; sessions accepted on a
//! port inherit that port's minimum share difficulty.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::dispatcher::{DispatchResult, ShareDispatcher, SubmitOutcome, SubmitReply};
use crate::pool::session::{SessionId, WorkerSession};
use crate::protocol::{
    ERR_INVALID_REQUEST, ERR_METHOD_NOT_FOUND, JobTemplate, LoginParams, RpcError, RpcRequest,
    RpcResponse, SubmitParams,
};
use dashmap::DashMap;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, tcp::OwnedWriteHalf};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Shared listener state
pub struct PoolState {
    /// Active sessions
    sessions: DashMap<SessionId, Arc<RwLock<WorkerSession>>>,
    /// Max concurrent connections across all ports
    max_connections: usize,
}

impl PoolState {
    /// Number of connected workers
    pub fn connected(&self) -> usize {
        self.sessions.len()
    }
}

/// The pool-facing Stratum server
pub struct PoolServer {
    config: Arc<Config>,
    state: Arc<PoolState>,
    dispatcher: Arc<ShareDispatcher>,
    job_tx: broadcast::Sender<JobTemplate>,
    current_job: Arc<parking_lot::RwLock<Option<JobTemplate>>>,
}

impl PoolServer {
    /// Create a new pool server
    pub fn new(
        config: Arc<Config>,
        dispatcher: Arc<ShareDispatcher>,
        job_tx: broadcast::Sender<JobTemplate>,
        current_job: Arc<parking_lot::RwLock<Option<JobTemplate>>>,
    ) -> Self {
        let max_connections = config.workers.max_connections;
        Self {
            config,
            state: Arc::new(PoolState {
                sessions: DashMap::new(),
                max_connections,
            }),
            dispatcher,
            job_tx,
            current_job,
        }
    }

    /// Bind every configured worker port and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        for wp in &self.config.workers.port_difficulty {
            let addr: SocketAddr =
                format!("{}:{}", self.config.workers.listen_address, wp.port)
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid listen address: {}", e)))?;

            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| Error::other(format!("Failed to bind to {}: {}", addr, e)))?;

            info!(
                "Listening for workers on {} (difficulty {})",
                addr, wp.difficulty
            );

            let state = Arc::clone(&self.state);
            let dispatcher = Arc::clone(&self.dispatcher);
            let job_tx = self.job_tx.clone();
            let current_job = Arc::clone(&self.current_job);
            let port = wp.port;
            let difficulty = wp.difficulty;

            tokio::spawn(async move {
                accept_loop(listener, port, difficulty, state, dispatcher, job_tx, current_job)
                    .await;
            });
        }

        tokio::signal::ctrl_c().await?;
        info!("Shutting down pool server");
        Ok(())
    }
}

/// Accept connections on one worker port
async fn accept_loop(
    listener: TcpListener,
    port: u16,
    difficulty: u64,
    state: Arc<PoolState>,
    dispatcher: Arc<ShareDispatcher>,
    job_tx: broadcast::Sender<JobTemplate>,
    current_job: Arc<parking_lot::RwLock<Option<JobTemplate>>>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Accept failed on port {}: {}", port, e);
                continue;
            }
        };

        if state.sessions.len() >= state.max_connections {
            warn!("Max connections reached, rejecting {}", addr);
            continue;
        }

        let state = Arc::clone(&state);
        let dispatcher = Arc::clone(&dispatcher);
        let current_job = Arc::clone(&current_job);
        let job_rx = job_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = handle_worker(
                stream,
                addr,
                port,
                difficulty,
                state,
                dispatcher,
                job_rx,
                current_job,
            )
            .await
            {
                debug!("Worker {} error: {}", addr, e);
            }
        });
    }
}

/// Handle one worker connection
#[allow(clippy::too_many_arguments)]
async fn handle_worker(
    stream: TcpStream,
    addr: SocketAddr,
    port: u16,
    difficulty: u64,
    state: Arc<PoolState>,
    dispatcher: Arc<ShareDispatcher>,
    mut job_rx: broadcast::Receiver<JobTemplate>,
    current_job: Arc<parking_lot::RwLock<Option<JobTemplate>>>,
) -> Result<()> {
    info!("New worker connection from {} on port {}", addr, port);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let session = Arc::new(RwLock::new(WorkerSession::new(
        addr.to_string(),
        port,
        difficulty,
    )));
    let session_id = session.read().await.id;
    state.sessions.insert(session_id, Arc::clone(&session));

    // Outcomes of upstream submissions come back on this channel
    let (reply_tx, mut reply_rx) = mpsc::channel::<SubmitReply>(64);

    let result = worker_loop(
        &mut reader,
        &mut writer,
        &session,
        &dispatcher,
        &current_job,
        &mut job_rx,
        reply_tx,
        &mut reply_rx,
    )
    .await;

    state.sessions.remove(&session_id);
    info!("Worker {} disconnected", addr);
    result
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    session: &Arc<RwLock<WorkerSession>>,
    dispatcher: &Arc<ShareDispatcher>,
    current_job: &Arc<parking_lot::RwLock<Option<JobTemplate>>>,
    job_rx: &mut broadcast::Receiver<JobTemplate>,
    reply_tx: mpsc::Sender<SubmitReply>,
    reply_rx: &mut mpsc::Receiver<SubmitReply>,
) -> Result<()> {
    loop {
        let mut line = String::new();

        tokio::select! {
            // Requests from the worker
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let keep_going =
                            handle_line(&line, writer, session, dispatcher, current_job, &reply_tx)
                                .await?;
                        if !keep_going {
                            break;
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            // New work from the upstream node
            Ok(mut job) = job_rx.recv() => {
                let (wants_job, difficulty, height) = {
                    let mut session = session.write().await;
                    session.status.height = job.height;
                    let wants_job = session.authenticated || session.needs_job;
                    session.needs_job = false;
                    (wants_job, session.difficulty, job.height)
                };
                if wants_job {
                    // The worker mines at the session difficulty, not the node's
                    job.difficulty = difficulty;
                    let request = RpcRequest::new(
                        "Stratum",
                        "job",
                        Some(serde_json::to_value(&job)?),
                    );
                    write_json(writer, &serde_json::to_string(&request)?).await?;
                    debug!(height, "Pushed job to worker");
                }
            }

            // Classified outcomes of forwarded shares
            Some(reply) = reply_rx.recv() => {
                let mut session = session.write().await;
                match &reply.outcome {
                    SubmitOutcome::Accepted => {
                        session.status.accepted += 1;
                        let response = RpcResponse::success(
                            reply.rpc_id.clone(),
                            "submit",
                            Value::String("ok".to_string()),
                        );
                        drop(session);
                        write_json(writer, &serde_json::to_string(&response)?).await?;
                    }
                    SubmitOutcome::Stale(err) => {
                        session.status.stale += 1;
                        let response =
                            RpcResponse::error(reply.rpc_id.clone(), "submit", err.clone());
                        drop(session);
                        write_json(writer, &serde_json::to_string(&response)?).await?;
                    }
                    SubmitOutcome::Rejected(err) => {
                        session.status.rejected += 1;
                        let response =
                            RpcResponse::error(reply.rpc_id.clone(), "submit", err.clone());
                        drop(session);
                        write_json(writer, &serde_json::to_string(&response)?).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Process one request line from the worker
///
/// Returns false when the connection should be dropped.
async fn handle_line(
    line: &str,
    writer: &mut OwnedWriteHalf,
    session: &Arc<RwLock<WorkerSession>>,
    dispatcher: &Arc<ShareDispatcher>,
    current_job: &Arc<parking_lot::RwLock<Option<JobTemplate>>>,
    reply_tx: &mpsc::Sender<SubmitReply>,
) -> Result<bool> {
    let req: RpcRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            debug!("Malformed request from worker: {}", e);
            let response = RpcResponse::error(
                "",
                "unknown",
                RpcError::new(ERR_INVALID_REQUEST, "Invalid request"),
            );
            write_json(writer, &serde_json::to_string(&response)?).await?;
            return Ok(false);
        }
    };

    match req.method.as_str() {
        "login" => {
            let params: LoginParams = match req.params.and_then(|p| serde_json::from_value(p).ok())
            {
                Some(p) => p,
                None => {
                    let response = RpcResponse::error(
                        req.id,
                        "login",
                        RpcError::new(ERR_INVALID_REQUEST, "Invalid login params"),
                    );
                    write_json(writer, &serde_json::to_string(&response)?).await?;
                    return Ok(false);
                }
            };

            let mut session = session.write().await;
            if session.accept_login(params) {
                info!("Worker {} logged in as {}", session.addr, session.fullname());
                let response = RpcResponse::success(
                    req.id,
                    "login",
                    Value::String("ok".to_string()),
                );
                drop(session);
                write_json(writer, &serde_json::to_string(&response)?).await?;
            } else {
                warn!("Worker {} sent an invalid login name", session.addr);
                let response = RpcResponse::error(
                    req.id,
                    "login",
                    RpcError::new(ERR_INVALID_REQUEST, "Invalid worker name"),
                );
                drop(session);
                write_json(writer, &serde_json::to_string(&response)?).await?;
                return Ok(false);
            }
        }

        "getjobtemplate" => {
            let job = current_job.read().clone();
            match job {
                Some(mut job) => {
                    let mut session = session.write().await;
                    job.difficulty = session.difficulty;
                    session.status.height = job.height;
                    session.needs_job = false;
                    drop(session);
                    let response = RpcResponse::success(
                        req.id,
                        "getjobtemplate",
                        serde_json::to_value(&job)?,
                    );
                    write_json(writer, &serde_json::to_string(&response)?).await?;
                }
                None => {
                    // Answered when the first job arrives from the node
                    session.write().await.needs_job = true;
                    debug!("Worker requested a job before the node sent one");
                }
            }
        }

        "submit" => {
            let authenticated = session.read().await.authenticated;
            if !authenticated {
                let response = RpcResponse::error(
                    req.id,
                    "submit",
                    RpcError::new(ERR_INVALID_REQUEST, "Login required"),
                );
                write_json(writer, &serde_json::to_string(&response)?).await?;
                return Ok(true);
            }

            let params: SubmitParams = match req.params.and_then(|p| serde_json::from_value(p).ok())
            {
                Some(p) => p,
                None => {
                    let response = RpcResponse::error(
                        req.id,
                        "submit",
                        RpcError::new(ERR_INVALID_REQUEST, "Invalid submit params"),
                    );
                    write_json(writer, &serde_json::to_string(&response)?).await?;
                    return Ok(true);
                }
            };

            let (worker_id, fullname, worker_addr, difficulty) = {
                let session = session.read().await;
                (
                    session.worker_id,
                    session.fullname(),
                    session.addr.clone(),
                    session.difficulty,
                )
            };

            let result = dispatcher
                .submit(
                    req.id.clone(),
                    worker_id,
                    fullname,
                    worker_addr,
                    difficulty,
                    params,
                    reply_tx.clone(),
                )
                .await?;

            if let DispatchResult::Rejected(err) = result {
                let mut session = session.write().await;
                if err.code == crate::protocol::ERR_STALE_SOLUTION {
                    session.status.stale += 1;
                } else {
                    session.status.rejected += 1;
                }
                drop(session);
                let response = RpcResponse::error(req.id, "submit", err);
                write_json(writer, &serde_json::to_string(&response)?).await?;
            }
        }

        "status" => {
            let status = session.read().await.status.clone();
            let response =
                RpcResponse::success(req.id, "status", serde_json::to_value(status)?);
            write_json(writer, &serde_json::to_string(&response)?).await?;
        }

        "keepalive" => {
            let response =
                RpcResponse::success(req.id, "keepalive", Value::String("ok".to_string()));
            write_json(writer, &serde_json::to_string(&response)?).await?;
        }

        method => {
            warn!("Unknown request from worker: {}", method);
            let response = RpcResponse::error(
                req.id,
                method,
                RpcError::new(
                    ERR_METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                ),
            );
            write_json(writer, &serde_json::to_string(&response)?).await?;
            return Ok(false);
        }
    }

    Ok(true)
}

async fn write_json(writer: &mut OwnedWriteHalf, json: &str) -> Result<()> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
