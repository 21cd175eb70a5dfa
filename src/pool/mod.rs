//! Worker-facing pool server
//!
//! Listens for miner connections, tracks per-worker sessions and
//! difficulty, validates submitted shares and hands good ones to the
//! upstream relay.

pub mod difficulty;
pub mod dispatcher;
pub mod server;
pub mod session;

pub use difficulty::share_difficulty;
pub use dispatcher::{
    DispatchResult, ShareDispatcher, ShareSubmission, SubmitOutcome, SubmitReply,
};
pub use server::{PoolServer, PoolState};
pub use session::{SessionId, WorkerSession, validate_fullname};
