//! Piece I/O service actor.
//!
//! The service owns the priority reconciler, the redundant-connection flags
//! and the pending-read tracker for every torrent. Callers talk to it through
//! [`PieceIoHandle`]; the download engine reports progress through the same
//! handle via [`EngineEvents`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::PieceIoError;
use crate::torrent::{InfoHash, PieceIndex, ReadError};

pub mod actor;
pub mod commands;
pub mod core;
pub mod handle;
pub mod status;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

#[cfg(test)]
mod integration_tests;

pub use actor::{spawn_piece_io_service, start_piece_io_service};
pub use handle::PieceIoHandle;
pub use status::{StatusField, StatusValue};
#[cfg(any(test, feature = "test-utils"))]
pub use test_mocks::MockTorrentEngine;

/// Notifications the download engine delivers as things happen.
///
/// Implementations must not block: they are called from the engine's alert
/// dispatch.
pub trait EngineEvents: Send + Sync {
    /// A torrent was added to the session.
    fn torrent_added(&self, info_hash: InfoHash);

    /// A torrent was removed from the session.
    fn torrent_removed(&self, info_hash: InfoHash);

    /// A piece passed its hash check and is on disk.
    fn piece_finished(&self, info_hash: InfoHash, piece: PieceIndex);

    /// A read started with `TorrentEngine::read_piece` finished.
    fn read_piece_completed(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        data: Bytes,
        error: Option<ReadError>,
    );

    /// The torrent's disk cache was flushed.
    fn cache_flushed(&self, info_hash: InfoHash, pieces: Option<Vec<PieceIndex>>);
}

/// Source of the per-torrent status fields published to the host client.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    /// Fields this provider can answer.
    fn status_fields(&self) -> &'static [StatusField] {
        &StatusField::ALL
    }

    /// Values of `fields` for one torrent.
    ///
    /// # Errors
    /// - `PieceIoError::Engine` - An engine-backed field was requested for a
    ///   torrent the engine does not know
    /// - `PieceIoError::ServiceShutdown` - Provider is no longer running
    async fn status(
        &self,
        info_hash: InfoHash,
        fields: &[StatusField],
    ) -> Result<BTreeMap<StatusField, StatusValue>, PieceIoError>;
}
