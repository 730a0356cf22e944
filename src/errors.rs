//! Typed error hierarchy for the explorer.
//!
//! Three top-level enums cover the three subsystems:
//! - `CdbError` — failures at the remote service boundary (transport, wire
//!   protocol, rejected statuses, bad inputs)
//! - `EngineError` — failures inside the concurrent engines (worker pools,
//!   visitors)
//! - `PolicyError` — invalid arguments, rejected before any request is made

use thiserror::Error;

/// Errors from the remote service boundary.
#[derive(Debug, Error)]
pub enum CdbError {
    /// HTTP-level failure that survived every retry.
    #[error("transport failure after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with something we cannot interpret.
    #[error("protocol error: {detail} (board: {fen})")]
    Protocol { detail: String, fen: String },

    /// The backend answered with a status the caller asked to raise on.
    #[error("request rejected with status {status:?} (board: {fen})")]
    Rejected {
        status: crate::api::CdbStatus,
        fen: String,
    },

    #[error("invalid FEN: {0}")]
    BadFen(String),

    #[error("illegal or unparseable UCI move {uci} in position {fen}")]
    BadMove { uci: String, fen: String },
}

/// Errors from the concurrent engines (executor, orchestrator, traversal).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] CdbError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The worker pool went away while the coordinator still needed it.
    #[error("worker pool closed unexpectedly")]
    PoolClosed,

    /// A worker task panicked or was cancelled out from under us.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("visitor error: {0}")]
    Visitor(#[source] anyhow::Error),
}

/// Invalid arguments, rejected at call entry before any work occurs.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(
        "cp margin {margin} exceeds the {ceiling} cp ceiling and would make a lot of bad requests"
    )]
    MarginTooWide { margin: u32, ceiling: u32 },

    #[error("margin decay must be zero or positive (got {0})")]
    NegativeDecay(f64),

    #[error("limit must be at least 1 (got {0})")]
    InvalidLimit(u64),
}
