//! Message definitions for the piece I/O service actor.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::status::{StatusField, StatusValue};
use crate::reconcile::{PriorityMap, RedundantConnectionsMap};
use crate::torrent::{
    CacheInfo, EngineError, InfoHash, PieceIndex, Priority, ReadError, SettingValue,
};

type EngineResponder<T> = oneshot::Sender<Result<T, EngineError>>;

/// Requests that can be sent to the piece I/O service actor.
///
/// Each command carries a response channel for the actor to send back its
/// result. The actor handles commands one at a time, which is what keeps the
/// reconciler and read tracker free of locks.
pub enum PieceIoCommand {
    /// Packed have-bitfield of a torrent.
    GetPieceBitfield {
        info_hash: InfoHash,
        responder: EngineResponder<Vec<u8>>,
    },
    /// One 0/1 byte per piece.
    GetPieces {
        info_hash: InfoHash,
        responder: EngineResponder<Vec<u8>>,
    },
    GetPiecePriorityMap {
        info_hash: InfoHash,
        responder: oneshot::Sender<PriorityMap>,
    },
    /// Replace and delete caller priority specs, then reconcile.
    UpdatePiecePriorityMap {
        info_hash: InfoHash,
        update: Option<PriorityMap>,
        delete: Option<Vec<String>>,
        responder: oneshot::Sender<()>,
    },
    /// Merge and delete pieces of one caller's per-piece priorities, then
    /// reconcile.
    UpdateCallerPiecePriorities {
        info_hash: InfoHash,
        caller: String,
        update: Option<BTreeMap<PieceIndex, Priority>>,
        delete: Option<Vec<PieceIndex>>,
        responder: oneshot::Sender<()>,
    },
    GetKeepRedundantConnectionsMap {
        info_hash: InfoHash,
        responder: oneshot::Sender<RedundantConnectionsMap>,
    },
    /// Merge and delete caller redundant-connection flags, then apply.
    UpdateKeepRedundantConnectionsMap {
        info_hash: InfoHash,
        update: Option<RedundantConnectionsMap>,
        delete: Option<Vec<String>>,
        responder: oneshot::Sender<()>,
    },
    GetSequentialDownload {
        info_hash: InfoHash,
        responder: EngineResponder<bool>,
    },
    SetSequentialDownload {
        info_hash: InfoHash,
        sequential: bool,
        responder: EngineResponder<()>,
    },
    /// Start a piece read; the data arrives as an event.
    ReadPiece {
        info_hash: InfoHash,
        piece: PieceIndex,
        responder: EngineResponder<()>,
    },
    FlushCache {
        info_hash: InfoHash,
        responder: EngineResponder<()>,
    },
    GetPiecePriorities {
        info_hash: InfoHash,
        responder: EngineResponder<Vec<Priority>>,
    },
    SetPieceDeadline {
        info_hash: InfoHash,
        piece: PieceIndex,
        deadline: Duration,
        alert_when_available: bool,
        responder: EngineResponder<()>,
    },
    ResetPieceDeadline {
        info_hash: InfoHash,
        piece: PieceIndex,
        responder: EngineResponder<()>,
    },
    GetCacheInfo {
        info_hash: InfoHash,
        responder: EngineResponder<CacheInfo>,
    },
    GetSessionSettings {
        keys: Vec<String>,
        responder: EngineResponder<BTreeMap<String, SettingValue>>,
    },
    SetSessionSettings {
        settings: BTreeMap<String, SettingValue>,
        responder: EngineResponder<()>,
    },
    GetStatus {
        info_hash: InfoHash,
        fields: Vec<StatusField>,
        responder: EngineResponder<BTreeMap<StatusField, StatusValue>>,
    },
    /// Stop the actor after persisting the latest state.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Asynchronous notifications coming from the download engine.
#[derive(Debug, Clone)]
pub enum EngineNotification {
    TorrentAdded {
        info_hash: InfoHash,
    },
    TorrentRemoved {
        info_hash: InfoHash,
    },
    PieceFinished {
        info_hash: InfoHash,
        piece: PieceIndex,
    },
    ReadPieceCompleted {
        info_hash: InfoHash,
        piece: PieceIndex,
        data: Bytes,
        error: Option<ReadError>,
    },
    CacheFlushed {
        info_hash: InfoHash,
        pieces: Option<Vec<PieceIndex>>,
    },
}
