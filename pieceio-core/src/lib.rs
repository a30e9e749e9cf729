//! PieceIO Core - piece-level I/O for BitTorrent clients
//!
//! Lets several independent callers (filesystem mounts, streaming sessions,
//! feature modules) share one torrent's piece priorities, connection policy
//! and piece reads without stepping on each other. Caller requests are merged
//! into the single per-piece vector the download engine understands, piece
//! reads are deduplicated and delivered in order, and priority maps survive
//! restarts through a background state writer.

pub mod config;
pub mod events;
pub mod reads;
pub mod reconcile;
pub mod service;
pub mod state;
pub mod torrent;
pub mod tracing_setup;

pub use config::PieceIoConfig;
pub use events::{CacheFlushedEvent, PieceIoEvent, ReadPieceEvent};
pub use reconcile::{PriorityMap, PrioritySpec, RedundantConnectionsMap};
pub use service::{
    EngineEvents, PieceIoHandle, StatusField, StatusProvider, StatusValue,
    spawn_piece_io_service, start_piece_io_service,
};
pub use state::StateError;
pub use torrent::{EngineError, InfoHash, InvalidInfoHash, PieceIndex, Priority, TorrentEngine};

/// Errors that can surface from any PieceIO subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PieceIoError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    InvalidInfoHash(#[from] InvalidInfoHash),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Piece I/O service has shut down")]
    ServiceShutdown,
}

impl PieceIoError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            PieceIoError::Engine(e) => match e {
                EngineError::TorrentNotFound { info_hash } => {
                    format!("Torrent {info_hash} not found")
                }
                EngineError::InvalidPiece { piece, .. } => {
                    format!("Piece {piece} does not exist in this torrent")
                }
                EngineError::UnknownSetting { key } => format!("Unknown setting: {key}"),
                EngineError::Engine { .. } => "Download engine error occurred".to_string(),
            },
            PieceIoError::State(_) => "Could not read or write the state file".to_string(),
            PieceIoError::InvalidInfoHash(e) => e.to_string(),
            PieceIoError::Configuration { reason } => format!("Configuration error: {reason}"),
            PieceIoError::Io(_) => "File system error occurred".to_string(),
            PieceIoError::ServiceShutdown => "Piece I/O service is not running".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PieceIoError::Configuration { .. }
                | PieceIoError::InvalidInfoHash(_)
                | PieceIoError::Engine(
                    EngineError::InvalidPiece { .. } | EngineError::UnknownSetting { .. }
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, PieceIoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        let invalid: PieceIoError = "xyz".parse::<InfoHash>().unwrap_err().into();
        assert!(invalid.is_user_error());

        let not_found = PieceIoError::from(EngineError::TorrentNotFound {
            info_hash: InfoHash::new([0u8; 20]),
        });
        assert!(!not_found.is_user_error());
        assert_eq!(
            not_found.user_message(),
            format!("Torrent {} not found", "00".repeat(20))
        );
        assert!(!PieceIoError::ServiceShutdown.is_user_error());
    }
}
