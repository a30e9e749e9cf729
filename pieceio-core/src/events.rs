//! Events published to subscribers of the piece I/O service.

use bytes::Bytes;
use serde::Serialize;

use crate::torrent::{InfoHash, PieceIndex, ReadError};

/// A piece read finished, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadPieceEvent {
    pub info_hash: InfoHash,
    pub piece: PieceIndex,
    /// Piece payload, empty when the read failed
    #[serde(with = "serde_bytes_as_hex")]
    pub data: Bytes,
    /// Engine-reported error, passed through verbatim
    pub error: Option<ReadError>,
}

/// The engine finished flushing a torrent's disk cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheFlushedEvent {
    pub info_hash: InfoHash,
    /// Pieces written out by the flush, when the engine reports them
    pub pieces: Option<Vec<PieceIndex>>,
}

/// Everything fanned out through [`crate::service::PieceIoHandle::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PieceIoEvent {
    ReadPiece(ReadPieceEvent),
    CacheFlushed(CacheFlushedEvent),
}

impl PieceIoEvent {
    pub fn info_hash(&self) -> InfoHash {
        match self {
            PieceIoEvent::ReadPiece(event) => event.info_hash,
            PieceIoEvent::CacheFlushed(event) => event.info_hash,
        }
    }
}

mod serde_bytes_as_hex {
    use bytes::Bytes;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }
}
