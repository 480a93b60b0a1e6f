//! Closed error enums for the engine's library surface (§7, §10.3).
//!
//! `thiserror` is used here so the retry policy and task manager can match on
//! a tag rather than a string; `anyhow` is reserved for the CLI boundary.

use thiserror::Error;

/// Behavioral classification of a single segment fetch/decrypt/write failure.
/// The retry policy (§4.E) dispatches on this, never on message text.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("curl error: {0}")]
    Curl(#[from] curl::Error),

    #[error("HTTP {status}")]
    Http { status: u32 },

    #[error("circuit open for host, request not attempted")]
    CircuitOpen,

    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("segment cancelled")]
    Cancelled,
}

/// Task-level fatal errors (§7): these surface as exactly one `TASK_FAILED`
/// event with a non-empty reason string, never as a retry.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("missing output path")]
    MissingOutputPath,

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("{completed} of {total} segments completed; missing indices: {missing:?}")]
    IncompleteSegments {
        completed: usize,
        total: usize,
        missing: Vec<usize>,
    },

    #[error("recovery store error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("task cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("playlist has no variants and no segments")]
    Empty,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no recovery session for task {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no segments to merge")]
    NoSegments,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("muxer exited with status {0}")]
    MuxerFailed(String),
}
