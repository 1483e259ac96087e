//! Typed error types for tab-recall.
//!
//! Library boundaries return these so callers can match on specific failure
//! modes; the binary wraps them in `anyhow` with context.

use crate::history::TabId;
use thiserror::Error;

/// Failure reading or writing the durable key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be read, written, or renamed.
    #[error("Storage I/O failed for '{path}': {source}")]
    Io {
        /// Path of the backing file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The stored blob is not a JSON object, or a value failed to (de)serialize.
    #[error("Storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored blob parsed but does not have the expected shape.
    #[error("Stored value for '{key}' is malformed: {details}")]
    Malformed {
        /// Storage key whose value was rejected.
        key: String,
        /// Human-readable description of the problem.
        details: String,
    },

    /// The backend refused the operation (used by in-memory and test stores).
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a queued history operation.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Loading or persisting the history failed. In-memory state is kept.
    #[error("History persistence failed: {0}")]
    Storage(#[from] StoreError),

    /// The tracker's queue has shut down and no longer accepts operations.
    #[error("History tracker is closed")]
    Closed,
}

/// Failure reported by the browser host collaborator.
#[derive(Debug, Error)]
pub enum HostError {
    /// The host has no tab with this id.
    #[error("No tab with id {0}")]
    TabNotFound(TabId),

    /// Any other host API failure.
    #[error("Host API call '{call}' failed: {message}")]
    Api {
        /// Name of the host call.
        call: &'static str,
        /// Message reported by the host.
        message: String,
    },
}

/// Failure while routing a browser event.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Host(#[from] HostError),

    /// The replacement-tab loop did not reach a terminal outcome.
    #[error("Gave up resolving a replacement tab after {attempts} attempts")]
    ResolveLimit {
        /// Iterations performed before giving up.
        attempts: usize,
    },
}
