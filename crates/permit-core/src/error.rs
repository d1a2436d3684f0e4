//! Errors raised by the offline side: tree build, permit table, nullifier and chunk planning.
//! All of them are local and surface before any ledger round-trip.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("capacity exceeded: {count} secrets for depth {depth} (max {capacity})")]
    CapacityExceeded { count: usize, depth: u32, capacity: u64 },

    #[error("invalid tree depth {0} (expected 1..=32)")]
    InvalidDepth(u32),

    #[error("index {index} out of range for depth {depth}")]
    IndexOutOfRange { index: u64, depth: u32 },

    #[error("malformed permit table: {0}")]
    MalformedTable(String),

    #[error("chunk size must be non-zero")]
    InvalidChunkSize,

    #[error("proof too short for prefix nullifier: {len} < {need} bytes")]
    ProofTooShort { len: usize, need: usize },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, CoreError>;
