//! Service state and operations, run inside the actor task.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::status::{StatusField, StatusValue};
use crate::events::{CacheFlushedEvent, PieceIoEvent, ReadPieceEvent};
use crate::reads::PendingReadTracker;
use crate::reconcile::{
    PriorityMap, PriorityReconciler, PrioritySnapshot, RedundantConnections,
    RedundantConnectionsMap,
};
use crate::state::StateStore;
use crate::torrent::{
    CacheInfo, EngineError, InfoHash, PieceIndex, Priority, ReadError, SettingValue,
    TorrentEngine, encode_bitfield, encode_piece_flags,
};

/// Piece I/O service implementation.
///
/// Owns every piece of per-torrent state and the engine. It is only ever
/// driven by the actor loop, one message at a time, so nothing in here is
/// synchronized.
pub struct PieceIoService<E: TorrentEngine> {
    engine: E,
    priorities: PriorityReconciler,
    redundant: RedundantConnections,
    reads: PendingReadTracker,
    store: StateStore,
    events: broadcast::Sender<PieceIoEvent>,
}

impl<E: TorrentEngine> PieceIoService<E> {
    /// Creates the service around restored priority state.
    pub fn new(
        engine: E,
        store: StateStore,
        restored: PrioritySnapshot,
        events: broadcast::Sender<PieceIoEvent>,
    ) -> Self {
        Self {
            engine,
            priorities: PriorityReconciler::from_snapshot(restored),
            redundant: RedundantConnections::new(),
            reads: PendingReadTracker::new(),
            store,
            events,
        }
    }

    /// Packed have-bitfield, piece 0 in the high bit of the first byte.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    pub async fn piece_bitfield(&self, info_hash: InfoHash) -> Result<Vec<u8>, EngineError> {
        let status = self.engine.status(info_hash).await?;
        Ok(encode_bitfield(&status.pieces))
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    pub async fn pieces(&self, info_hash: InfoHash) -> Result<Vec<u8>, EngineError> {
        let status = self.engine.status(info_hash).await?;
        Ok(encode_piece_flags(&status.pieces))
    }

    pub fn piece_priority_map(&self, info_hash: InfoHash) -> PriorityMap {
        self.priorities.priority_map(info_hash)
    }

    /// Applies a caller priority update, pushes the merged priorities to the
    /// engine and persists the new maps.
    pub async fn update_piece_priority_map(
        &mut self,
        info_hash: InfoHash,
        update: Option<PriorityMap>,
        delete: Option<Vec<String>>,
    ) {
        self.priorities.update(info_hash, update, delete);
        self.apply_piece_priorities(info_hash).await;
        self.save_state();
    }

    /// Applies a piece-level update to one caller's priorities, then pushes
    /// and persists like [`Self::update_piece_priority_map`].
    pub async fn update_caller_piece_priorities(
        &mut self,
        info_hash: InfoHash,
        caller: &str,
        update: Option<BTreeMap<PieceIndex, Priority>>,
        delete: Option<Vec<PieceIndex>>,
    ) {
        self.priorities.update_caller(info_hash, caller, update, delete);
        self.apply_piece_priorities(info_hash).await;
        self.save_state();
    }

    pub fn keep_redundant_connections_map(&self, info_hash: InfoHash) -> RedundantConnectionsMap {
        self.redundant.flags(info_hash)
    }

    pub async fn update_keep_redundant_connections_map(
        &mut self,
        info_hash: InfoHash,
        update: Option<RedundantConnectionsMap>,
        delete: Option<Vec<String>>,
    ) {
        self.redundant.update(info_hash, update, delete);
        self.apply_keep_redundant_connections(info_hash).await;
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    pub async fn sequential_download(&self, info_hash: InfoHash) -> Result<bool, EngineError> {
        Ok(self.engine.status(info_hash).await?.sequential_download)
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    pub async fn set_sequential_download(
        &mut self,
        info_hash: InfoHash,
        sequential: bool,
    ) -> Result<(), EngineError> {
        self.engine
            .set_sequential_download(info_hash, sequential)
            .await
    }

    /// Starts a piece read unless one is already outstanding.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    /// - `EngineError::InvalidPiece` - Piece index out of range
    pub async fn read_piece(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
    ) -> Result<(), EngineError> {
        if !self.reads.request(info_hash, piece) {
            return Ok(());
        }

        if let Err(e) = self.engine.read_piece(info_hash, piece).await {
            let released = self.reads.cancel(info_hash, piece);
            self.publish_reads(released);
            return Err(e);
        }
        Ok(())
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    pub async fn flush_cache(&mut self, info_hash: InfoHash) -> Result<(), EngineError> {
        self.engine.flush_cache(info_hash).await
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    pub async fn piece_priorities(&self, info_hash: InfoHash) -> Result<Vec<Priority>, EngineError> {
        self.engine.piece_priorities(info_hash).await
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    /// - `EngineError::InvalidPiece` - Piece index out of range
    pub async fn set_piece_deadline(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
        deadline: Duration,
        alert_when_available: bool,
    ) -> Result<(), EngineError> {
        self.engine
            .set_piece_deadline(info_hash, piece, deadline, alert_when_available)
            .await
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    /// - `EngineError::InvalidPiece` - Piece index out of range
    pub async fn reset_piece_deadline(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
    ) -> Result<(), EngineError> {
        self.engine.reset_piece_deadline(info_hash, piece).await
    }

    /// # Errors
    /// - `EngineError::TorrentNotFound` - No live torrent with this hash
    pub async fn cache_info(&self, info_hash: InfoHash) -> Result<CacheInfo, EngineError> {
        self.engine.cache_info(info_hash).await
    }

    /// # Errors
    /// - `EngineError::UnknownSetting` - A key is not a known setting
    pub async fn session_settings(
        &self,
        keys: &[String],
    ) -> Result<BTreeMap<String, SettingValue>, EngineError> {
        self.engine.settings(keys).await
    }

    /// # Errors
    /// - `EngineError::UnknownSetting` - A key is not a known setting
    pub async fn apply_session_settings(
        &mut self,
        settings: BTreeMap<String, SettingValue>,
    ) -> Result<(), EngineError> {
        self.engine.apply_settings(settings).await
    }

    /// Collects the requested status fields for one torrent.
    ///
    /// # Errors
    /// - `EngineError::TorrentNotFound` - An engine-backed field was asked
    ///   for a torrent the engine does not know
    pub async fn status(
        &self,
        info_hash: InfoHash,
        fields: &[StatusField],
    ) -> Result<BTreeMap<StatusField, StatusValue>, EngineError> {
        let mut values = BTreeMap::new();
        for field in fields {
            let value = match field {
                StatusField::PieceBitfield => {
                    StatusValue::Bitfield(self.piece_bitfield(info_hash).await?)
                }
                StatusField::SequentialDownload => {
                    StatusValue::Flag(self.sequential_download(info_hash).await?)
                }
                StatusField::PiecePriorityMap => {
                    StatusValue::PriorityMap(self.piece_priority_map(info_hash))
                }
                StatusField::KeepRedundantConnectionsMap => StatusValue::RedundantConnectionsMap(
                    self.keep_redundant_connections_map(info_hash),
                ),
                StatusField::PiecePriorities => {
                    StatusValue::Priorities(self.piece_priorities(info_hash).await?)
                }
                StatusField::CacheInfo => StatusValue::CacheInfo(self.cache_info(info_hash).await?),
            };
            values.insert(*field, value);
        }
        Ok(values)
    }

    /// Sets up state for a torrent the engine just added.
    ///
    /// Priorities and flags written before the torrent existed, including
    /// priorities restored from disk, are pushed to the engine right away.
    pub async fn torrent_added(&mut self, info_hash: InfoHash) {
        info!("Torrent {info_hash} added");

        if self.redundant.ensure(info_hash) {
            self.apply_keep_redundant_connections(info_hash).await;
        }
        if self.priorities.contains(info_hash) {
            self.apply_piece_priorities(info_hash).await;
        }
        self.reads.track(info_hash);
    }

    /// Drops all state of a removed torrent and persists the rest.
    pub fn torrent_removed(&mut self, info_hash: InfoHash) {
        info!("Torrent {info_hash} removed");

        self.priorities.remove(info_hash);
        self.redundant.remove(info_hash);
        self.reads.remove(info_hash);
        self.save_state();
    }

    /// Retires priority entries satisfied by a newly verified piece.
    pub async fn piece_finished(&mut self, info_hash: InfoHash, piece: PieceIndex) {
        if !self.priorities.contains(info_hash) {
            return;
        }
        debug!("Piece {piece} finished for {info_hash}, reconciling priorities");

        if self.apply_piece_priorities(info_hash).await {
            self.save_state();
        }
    }

    /// Records a finished read and publishes every read now in order.
    pub fn read_piece_completed(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
        data: Bytes,
        error: Option<ReadError>,
    ) {
        if let Some(error) = &error {
            debug!("Read of piece {piece} for {info_hash} failed: {error}");
        }
        let ready = self.reads.complete(info_hash, piece, data, error);
        self.publish_reads(ready);
    }

    pub fn cache_flushed(&self, info_hash: InfoHash, pieces: Option<Vec<PieceIndex>>) {
        self.publish(PieceIoEvent::CacheFlushed(CacheFlushedEvent { info_hash, pieces }));
    }

    /// Persists the final state and stops the state writer.
    pub async fn shutdown(self) {
        self.store.save(self.priorities.snapshot());
        self.store.shutdown().await;
    }

    /// Reconciles and pushes the torrent's priorities.
    ///
    /// Returns true if stored specs were pruned. Unknown torrents and
    /// torrents without metadata are skipped.
    async fn apply_piece_priorities(&mut self, info_hash: InfoHash) -> bool {
        let status = match self.engine.status(info_hash).await {
            Ok(status) => status,
            Err(EngineError::TorrentNotFound { .. }) => {
                debug!("Deferring priorities for {info_hash} until the torrent is added");
                return false;
            }
            Err(e) => {
                warn!("Failed to query pieces of {info_hash}: {e}");
                return false;
            }
        };
        if status.pieces.is_empty() {
            return false;
        }

        let reconciliation = self.priorities.reconcile(info_hash, &status.pieces);
        let pruned = reconciliation.pruned;
        let priorities = reconciliation.into_pairs();
        debug!(
            "Applying {} piece priorities to {info_hash}",
            priorities.len()
        );
        if let Err(e) = self.engine.prioritize_pieces(info_hash, priorities).await {
            warn!("Failed to apply piece priorities to {info_hash}: {e}");
        }
        pruned
    }

    async fn apply_keep_redundant_connections(&mut self, info_hash: InfoHash) {
        let keep = self.redundant.keep_redundant(info_hash);
        match self
            .engine
            .set_keep_redundant_connections(info_hash, keep)
            .await
        {
            Ok(()) => {}
            Err(EngineError::TorrentNotFound { .. }) => {
                debug!("Deferring redundant connections flag for {info_hash}");
            }
            Err(e) => warn!("Failed to set redundant connections for {info_hash}: {e}"),
        }
    }

    fn save_state(&self) {
        self.store.save(self.priorities.snapshot());
    }

    fn publish_reads(&self, ready: Vec<ReadPieceEvent>) {
        for event in ready {
            self.publish(PieceIoEvent::ReadPiece(event));
        }
    }

    fn publish(&self, event: PieceIoEvent) {
        // No subscribers is not an error; events are fire and forget.
        if self.events.send(event).is_err() {
            debug!("Dropped event with no subscribers");
        }
    }
}
