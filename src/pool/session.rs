//! Worker session management

use crate::protocol::{LoginParams, WorkerStatus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use uuid::Uuid;

static NEXT_WORKER_ID: AtomicI32 = AtomicI32::new(0);

/// Session ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One connected miner
pub struct WorkerSession {
    /// Session ID
    pub id: SessionId,
    /// Pool-local numeric worker id, embedded in share-log records
    pub worker_id: i32,
    /// Remote address ("ip:port")
    pub addr: String,
    /// Port the worker connected on
    pub port: u16,
    /// Minimum share difficulty for this session's port
    pub difficulty: u64,
    /// Accepted login, if any
    pub login: Option<LoginParams>,
    /// Whether login succeeded
    pub authenticated: bool,
    /// Whether the worker asked for a job it has not been sent yet
    pub needs_job: bool,
    /// Running share counters
    pub status: WorkerStatus,
}

impl WorkerSession {
    /// Create a session for a freshly accepted connection
    pub fn new(addr: String, port: u16, difficulty: u64) -> Self {
        let id = SessionId::new();
        let worker_id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let mut status = WorkerStatus::new(worker_id.to_string());
        status.difficulty = difficulty;
        Self {
            id,
            worker_id,
            addr,
            port,
            difficulty,
            login: None,
            authenticated: false,
            needs_job: true,
            status,
        }
    }

    /// Worker fullname, with the placeholder used before login
    pub fn fullname(&self) -> String {
        match &self.login {
            None => "None.__default__".to_string(),
            Some(login) => login.login.clone(),
        }
    }

    /// Accept a login after name validation
    ///
    /// A missing rig name is normalized to `user.__default__`.
    pub fn accept_login(&mut self, mut params: LoginParams) -> bool {
        if !validate_fullname(&mut params.login) {
            return false;
        }
        self.login = Some(params);
        self.authenticated = true;
        true
    }
}

fn contains_only(check: &str, legal: &str) -> bool {
    let legal: HashSet<char> = legal.chars().collect();
    check.chars().all(|c| legal.contains(&c))
}

/// Validate and normalize a "username.rigname" login
pub fn validate_fullname(login: &mut String) -> bool {
    let (username, workername) = match login.split_once('.') {
        Some((user, rig)) => (user.to_string(), rig.to_string()),
        None => (login.clone(), String::new()),
    };

    let workername = if workername.is_empty() {
        "__default__".to_string()
    } else {
        workername
    };

    if validate_username(&username) && validate_workername(&workername) {
        *login = format!("{}.{}", username, workername);
        true
    } else {
        false
    }
}

fn validate_username(username: &str) -> bool {
    if username.is_empty() || username.len() > 20 {
        false
    } else {
        let legal = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";
        contains_only(username, legal)
    }
}

fn validate_workername(workername: &str) -> bool {
    if workername.is_empty() || workername.len() > 18 {
        false
    } else {
        let legal = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_.-";
        contains_only(workername, legal)
    }
}
