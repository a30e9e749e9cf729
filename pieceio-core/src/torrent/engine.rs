//! Interface to the underlying download engine.
//!
//! The engine owns the torrents, the piece picker and disk I/O. This crate
//! only issues piece-level commands against it and receives its asynchronous
//! notifications through [`crate::service::EngineEvents`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{InfoHash, PieceIndex};

/// Download priority of a single piece as understood by the engine.
///
/// Higher is more urgent. Negative values never reach the engine.
pub type Priority = i32;

/// Per-torrent state reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TorrentStatus {
    /// Have-bitfield, one flag per piece. Empty while metadata is unknown.
    pub pieces: Vec<bool>,
    /// Whether pieces are fetched in index order
    pub sequential_download: bool,
}

impl TorrentStatus {
    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Returns true if every piece is on disk.
    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(|&owned| owned)
    }
}

/// Error code attached to a finished piece read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadError {
    pub message: String,
    pub value: i32,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.value)
    }
}

/// Disk cache counters for one torrent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheInfo {
    pub blocks_written: u64,
    pub writes: u64,
    pub blocks_read: u64,
    pub blocks_read_hit: u64,
    pub reads: u64,
    pub cache_size: u64,
    pub read_cache_size: u64,
    pub total_used_buffers: u64,
}

/// Value of an engine-wide session setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Errors produced by the download engine for a specific call.
///
/// These are the only errors that cross the RPC boundary; reconciliation and
/// bookkeeping failures are logged and swallowed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Torrent {info_hash} not found")]
    TorrentNotFound { info_hash: InfoHash },

    #[error("Piece {piece} out of range for torrent {info_hash}")]
    InvalidPiece {
        info_hash: InfoHash,
        piece: PieceIndex,
    },

    #[error("Unknown session setting: {key}")]
    UnknownSetting { key: String },

    #[error("Engine error: {reason}")]
    Engine { reason: String },
}

/// Piece-level operations of the download engine.
///
/// Every call is a non-blocking request into the engine's own machinery.
/// `read_piece` and `flush_cache` complete later through engine
/// notifications rather than through their return value.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Current have-bitfield and sequential flag of a torrent.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    async fn status(&self, info_hash: InfoHash) -> Result<TorrentStatus, EngineError>;

    /// Sets the priority of the listed pieces.
    ///
    /// Pieces absent from `priorities` revert to the engine default.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    async fn prioritize_pieces(
        &mut self,
        info_hash: InfoHash,
        priorities: Vec<(PieceIndex, Priority)>,
    ) -> Result<(), EngineError>;

    /// Full per-piece priority vector currently applied by the engine.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    async fn piece_priorities(&self, info_hash: InfoHash) -> Result<Vec<Priority>, EngineError>;

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    async fn set_sequential_download(
        &mut self,
        info_hash: InfoHash,
        sequential: bool,
    ) -> Result<(), EngineError>;

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    async fn set_keep_redundant_connections(
        &mut self,
        info_hash: InfoHash,
        keep: bool,
    ) -> Result<(), EngineError>;

    /// Starts an asynchronous read of a whole piece.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    /// - `EngineError::InvalidPiece` - Piece index out of range
    async fn read_piece(&mut self, info_hash: InfoHash, piece: PieceIndex)
    -> Result<(), EngineError>;

    /// Starts an asynchronous flush of the torrent's disk cache.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    async fn flush_cache(&mut self, info_hash: InfoHash) -> Result<(), EngineError>;

    /// Asks the engine to have `piece` within `deadline`.
    ///
    /// With `alert_when_available` the engine also reads the piece back once
    /// it arrives, which surfaces as a read completion notification.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    /// - `EngineError::InvalidPiece` - Piece index out of range
    async fn set_piece_deadline(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
        deadline: Duration,
        alert_when_available: bool,
    ) -> Result<(), EngineError>;

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    /// - `EngineError::InvalidPiece` - Piece index out of range
    async fn reset_piece_deadline(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
    ) -> Result<(), EngineError>;

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    async fn cache_info(&self, info_hash: InfoHash) -> Result<CacheInfo, EngineError>;

    /// Reads engine-wide session settings by name.
    ///
    /// # Errors
    /// - `EngineError::UnknownSetting` - A key is not a known setting
    async fn settings(&self, keys: &[String])
    -> Result<BTreeMap<String, SettingValue>, EngineError>;

    /// Applies engine-wide session settings.
    ///
    /// # Errors
    /// - `EngineError::UnknownSetting` - A key is not a known setting
    async fn apply_settings(
        &mut self,
        settings: BTreeMap<String, SettingValue>,
    ) -> Result<(), EngineError>;
}
