//! Durable storage of caller priority maps.
//!
//! The on-disk copy is only read at startup. Afterwards the in-memory maps
//! are authoritative and every mutation queues a fresh snapshot for the
//! background writer.

pub mod snapshot;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

pub use snapshot::{decode_snapshot, encode_snapshot, load_snapshot};
pub use store::{FileSnapshotWriter, SnapshotWriter, StateStore};

/// Errors that occur while loading or writing persisted state.
///
/// None of these are fatal: load failures fall back to empty state and write
/// failures are logged until the next save succeeds.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state file: {reason}")]
    InvalidFormat { reason: String },
}
