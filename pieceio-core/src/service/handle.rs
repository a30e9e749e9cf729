//! Handle for communicating with the piece I/O service actor.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{EngineNotification, PieceIoCommand};
use super::status::{StatusField, StatusValue};
use super::{EngineEvents, StatusProvider};
use crate::PieceIoError;
use crate::events::PieceIoEvent;
use crate::reconcile::{PriorityMap, RedundantConnectionsMap};
use crate::torrent::{CacheInfo, InfoHash, PieceIndex, Priority, ReadError, SettingValue};

/// Handle for communicating with the piece I/O service actor.
///
/// Cheap to clone. Besides the request API it is the sink for engine
/// notifications, see [`EngineEvents`].
#[derive(Clone)]
pub struct PieceIoHandle {
    sender: mpsc::Sender<PieceIoCommand>,
    notifications: mpsc::UnboundedSender<EngineNotification>,
    events: broadcast::Sender<PieceIoEvent>,
}

impl PieceIoHandle {
    /// Creates a new handle around the actor's channels.
    pub fn new(
        sender: mpsc::Sender<PieceIoCommand>,
        notifications: mpsc::UnboundedSender<EngineNotification>,
        events: broadcast::Sender<PieceIoEvent>,
    ) -> Self {
        Self {
            sender,
            notifications,
            events,
        }
    }

    /// Sends one command and waits for its response.
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PieceIoCommand,
    ) -> Result<T, PieceIoError> {
        let (responder, rx) = oneshot::channel();

        self.sender
            .send(command(responder))
            .await
            .map_err(|_| PieceIoError::ServiceShutdown)?;

        rx.await.map_err(|_| PieceIoError::ServiceShutdown)
    }

    /// Packed have-bitfield of a torrent, MSB first.
    ///
    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown to the engine
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn get_piece_bitfield(&self, info_hash: InfoHash) -> Result<Vec<u8>, PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::GetPieceBitfield {
                info_hash,
                responder,
            })
            .await??)
    }

    /// One byte per piece, 1 when the piece is on disk.
    ///
    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown to the engine
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn get_pieces(&self, info_hash: InfoHash) -> Result<Vec<u8>, PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::GetPieces {
                info_hash,
                responder,
            })
            .await??)
    }

    /// Caller specs stored for a torrent.
    ///
    /// Returns an empty map for torrents with no stored specs, including
    /// torrents the engine has never seen.
    ///
    /// # Errors
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn get_piece_priority_map(
        &self,
        info_hash: InfoHash,
    ) -> Result<PriorityMap, PieceIoError> {
        self.request(|responder| PieceIoCommand::GetPiecePriorityMap {
            info_hash,
            responder,
        })
        .await
    }

    /// Replaces the specs of the callers in `update`, drops the callers in
    /// `delete`, then pushes the merged priorities to the engine.
    ///
    /// Torrents the engine does not know yet keep the specs until they are
    /// added. Returns once the engine has been updated; persistence happens
    /// in the background.
    ///
    /// # Errors
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn update_piece_priority_map(
        &self,
        info_hash: InfoHash,
        update: Option<PriorityMap>,
        delete: Option<Vec<String>>,
    ) -> Result<(), PieceIoError> {
        self.request(|responder| PieceIoCommand::UpdatePiecePriorityMap {
            info_hash,
            update,
            delete,
            responder,
        })
        .await
    }

    /// Merges `update` into the per-piece priorities of `caller` and removes
    /// the pieces in `delete`, then pushes the merged priorities.
    ///
    /// The caller is created when absent and dropped once it holds no pieces.
    /// A uniform spec of the caller is replaced only when `update` carries
    /// pieces.
    ///
    /// # Errors
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn update_caller_piece_priorities(
        &self,
        info_hash: InfoHash,
        caller: impl Into<String>,
        update: Option<BTreeMap<PieceIndex, Priority>>,
        delete: Option<Vec<PieceIndex>>,
    ) -> Result<(), PieceIoError> {
        let caller = caller.into();
        self.request(|responder| PieceIoCommand::UpdateCallerPiecePriorities {
            info_hash,
            caller,
            update,
            delete,
            responder,
        })
        .await
    }

    /// # Errors
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn get_keep_redundant_connections_map(
        &self,
        info_hash: InfoHash,
    ) -> Result<RedundantConnectionsMap, PieceIoError> {
        self.request(|responder| PieceIoCommand::GetKeepRedundantConnectionsMap {
            info_hash,
            responder,
        })
        .await
    }

    /// Merges caller flags and applies their logical OR to the engine.
    ///
    /// # Errors
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn update_keep_redundant_connections_map(
        &self,
        info_hash: InfoHash,
        update: Option<RedundantConnectionsMap>,
        delete: Option<Vec<String>>,
    ) -> Result<(), PieceIoError> {
        self.request(
            |responder| PieceIoCommand::UpdateKeepRedundantConnectionsMap {
                info_hash,
                update,
                delete,
                responder,
            },
        )
        .await
    }

    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown to the engine
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn get_sequential_download(&self, info_hash: InfoHash) -> Result<bool, PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::GetSequentialDownload {
                info_hash,
                responder,
            })
            .await??)
    }

    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown to the engine
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn set_sequential_download(
        &self,
        info_hash: InfoHash,
        sequential: bool,
    ) -> Result<(), PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::SetSequentialDownload {
                info_hash,
                sequential,
                responder,
            })
            .await??)
    }

    /// Asks the engine to read a piece.
    ///
    /// The data is delivered as a [`PieceIoEvent::ReadPiece`] to subscribers,
    /// in ascending piece order per torrent. Requesting a piece whose read is
    /// still outstanding does nothing.
    ///
    /// # Errors
    /// - `PieceIoError::Engine` - Engine rejected the read
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn read_piece(&self, info_hash: InfoHash, piece: PieceIndex) -> Result<(), PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::ReadPiece {
                info_hash,
                piece,
                responder,
            })
            .await??)
    }

    /// Flushes the torrent's disk cache; completion arrives as a
    /// [`PieceIoEvent::CacheFlushed`].
    ///
    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown to the engine
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn flush_cache(&self, info_hash: InfoHash) -> Result<(), PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::FlushCache {
                info_hash,
                responder,
            })
            .await??)
    }

    /// Per-piece priorities currently applied by the engine.
    ///
    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown to the engine
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn get_piece_priorities(
        &self,
        info_hash: InfoHash,
    ) -> Result<Vec<Priority>, PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::GetPiecePriorities {
                info_hash,
                responder,
            })
            .await??)
    }

    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown or piece out of range
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn set_piece_deadline(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        deadline: Duration,
        alert_when_available: bool,
    ) -> Result<(), PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::SetPieceDeadline {
                info_hash,
                piece,
                deadline,
                alert_when_available,
                responder,
            })
            .await??)
    }

    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown or piece out of range
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn reset_piece_deadline(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
    ) -> Result<(), PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::ResetPieceDeadline {
                info_hash,
                piece,
                responder,
            })
            .await??)
    }

    /// # Errors
    /// - `PieceIoError::Engine` - Torrent unknown to the engine
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn get_cache_info(&self, info_hash: InfoHash) -> Result<CacheInfo, PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::GetCacheInfo {
                info_hash,
                responder,
            })
            .await??)
    }

    /// Reads engine-wide session settings by key.
    ///
    /// # Errors
    /// - `PieceIoError::Engine` - A key is not a known setting
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn session_get_settings(
        &self,
        keys: Vec<String>,
    ) -> Result<BTreeMap<String, SettingValue>, PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::GetSessionSettings { keys, responder })
            .await??)
    }

    /// # Errors
    /// - `PieceIoError::Engine` - A key is not a known setting
    /// - `PieceIoError::ServiceShutdown` - Actor is no longer running
    pub async fn session_set_settings(
        &self,
        settings: BTreeMap<String, SettingValue>,
    ) -> Result<(), PieceIoError> {
        Ok(self
            .request(|responder| PieceIoCommand::SetSessionSettings {
                settings,
                responder,
            })
            .await??)
    }

    /// Subscribes to read and cache-flush events.
    ///
    /// Only events published after this call are received. Events are not
    /// retained per subscriber beyond `ServiceConfig::event_capacity`: a
    /// receiver that falls further behind gets `RecvError::Lagged` with the
    /// number of skipped events, and those events, read payloads included,
    /// are lost for it. Such a subscriber has to issue the reads again.
    pub fn subscribe(&self) -> broadcast::Receiver<PieceIoEvent> {
        self.events.subscribe()
    }

    /// Shuts down the service actor gracefully.
    ///
    /// Returns once the actor has stopped and the latest priority state has
    /// been written. After this call every request returns
    /// `PieceIoError::ServiceShutdown`.
    pub async fn shutdown(&self) -> Result<(), PieceIoError> {
        self.request(|responder| PieceIoCommand::Shutdown { responder })
            .await
    }

    /// Checks if the service actor is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    fn notify(&self, notification: EngineNotification) {
        if self.notifications.send(notification).is_err() {
            tracing::debug!("Dropped engine notification after service shutdown");
        }
    }
}

impl EngineEvents for PieceIoHandle {
    fn torrent_added(&self, info_hash: InfoHash) {
        self.notify(EngineNotification::TorrentAdded { info_hash });
    }

    fn torrent_removed(&self, info_hash: InfoHash) {
        self.notify(EngineNotification::TorrentRemoved { info_hash });
    }

    fn piece_finished(&self, info_hash: InfoHash, piece: PieceIndex) {
        self.notify(EngineNotification::PieceFinished { info_hash, piece });
    }

    fn read_piece_completed(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        data: Bytes,
        error: Option<ReadError>,
    ) {
        self.notify(EngineNotification::ReadPieceCompleted {
            info_hash,
            piece,
            data,
            error,
        });
    }

    fn cache_flushed(&self, info_hash: InfoHash, pieces: Option<Vec<PieceIndex>>) {
        self.notify(EngineNotification::CacheFlushed { info_hash, pieces });
    }
}

#[async_trait]
impl StatusProvider for PieceIoHandle {
    async fn status(
        &self,
        info_hash: InfoHash,
        fields: &[StatusField],
    ) -> Result<BTreeMap<StatusField, StatusValue>, PieceIoError> {
        let fields = fields.to_vec();
        Ok(self
            .request(|responder| PieceIoCommand::GetStatus {
                info_hash,
                fields,
                responder,
            })
            .await??)
    }
}
