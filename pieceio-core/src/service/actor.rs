//! Actor implementation for the piece I/O service.

use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{EngineNotification, PieceIoCommand};
use super::core::PieceIoService;
use super::handle::PieceIoHandle;
use crate::config::PieceIoConfig;
use crate::reconcile::PrioritySnapshot;
use crate::state::StateStore;
use crate::torrent::TorrentEngine;

/// Spawns the piece I/O service actor and returns its handle.
///
/// `restored` seeds the priority maps; they are applied to each torrent as
/// the engine reports it added. The actor processes commands and engine
/// notifications one at a time, so none of its state needs locking.
///
/// # Examples
/// ```rust,no_run
/// use pieceio_core::config::PieceIoConfig;
/// use pieceio_core::service::spawn_piece_io_service;
/// use pieceio_core::state::StateStore;
/// use pieceio_core::torrent::TorrentEngine;
///
/// # async fn example<E: TorrentEngine + 'static>(engine: E) {
/// let config = PieceIoConfig::default();
/// let (store, restored) = StateStore::open(&config.state).await;
/// let handle = spawn_piece_io_service(&config, engine, store, restored);
/// # }
/// ```
pub fn spawn_piece_io_service<E>(
    config: &PieceIoConfig,
    engine: E,
    store: StateStore,
    restored: PrioritySnapshot,
) -> PieceIoHandle
where
    E: TorrentEngine + 'static,
{
    let (sender, receiver) = mpsc::channel(config.service.command_buffer);
    let (notification_sender, notification_receiver) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(config.service.event_capacity);
    let service = PieceIoService::new(engine, store, restored, events.clone());

    tokio::spawn(async move {
        run_actor_loop(service, receiver, notification_receiver).await;
    });

    PieceIoHandle::new(sender, notification_sender, events)
}

/// Opens the configured state file and spawns the service around it.
pub async fn start_piece_io_service<E>(config: &PieceIoConfig, engine: E) -> PieceIoHandle
where
    E: TorrentEngine + 'static,
{
    let (store, restored) = StateStore::open(&config.state).await;
    spawn_piece_io_service(config, engine, store, restored)
}

/// Runs the main actor message processing loop.
///
/// Pending engine notifications are always drained before the next command so
/// that a command observes every piece and read the engine reported before it.
/// The loop ends on a shutdown command or once every handle is gone; either
/// way the latest priority state is flushed before the task exits.
async fn run_actor_loop<E: TorrentEngine>(
    mut service: PieceIoService<E>,
    mut receiver: mpsc::Receiver<PieceIoCommand>,
    mut notification_receiver: mpsc::UnboundedReceiver<EngineNotification>,
) {
    tracing::debug!("Piece I/O service actor started");

    let mut shutdown_responder = None;
    loop {
        tokio::select! {
            biased;
            Some(notification) = notification_receiver.recv() => {
                handle_notification(&mut service, notification).await;
            }
            Some(command) = receiver.recv() => {
                if let Some(responder) = handle_command(&mut service, command).await {
                    shutdown_responder = Some(responder);
                    break;
                }
            }
            else => break,
        }
    }

    drop(receiver);
    drop(notification_receiver);
    service.shutdown().await;
    if let Some(responder) = shutdown_responder {
        let _ = responder.send(());
    }

    tracing::debug!("Piece I/O service actor stopped");
}

/// Handles a single command.
///
/// Returns the shutdown responder when the actor should stop.
async fn handle_command<E: TorrentEngine>(
    service: &mut PieceIoService<E>,
    command: PieceIoCommand,
) -> Option<oneshot::Sender<()>> {
    match command {
        PieceIoCommand::GetPieceBitfield {
            info_hash,
            responder,
        } => {
            let result = service.piece_bitfield(info_hash).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::GetPieces {
            info_hash,
            responder,
        } => {
            let result = service.pieces(info_hash).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::GetPiecePriorityMap {
            info_hash,
            responder,
        } => {
            let _ = responder.send(service.piece_priority_map(info_hash));
        }

        PieceIoCommand::UpdatePiecePriorityMap {
            info_hash,
            update,
            delete,
            responder,
        } => {
            service
                .update_piece_priority_map(info_hash, update, delete)
                .await;
            let _ = responder.send(());
        }

        PieceIoCommand::UpdateCallerPiecePriorities {
            info_hash,
            caller,
            update,
            delete,
            responder,
        } => {
            service
                .update_caller_piece_priorities(info_hash, &caller, update, delete)
                .await;
            let _ = responder.send(());
        }

        PieceIoCommand::GetKeepRedundantConnectionsMap {
            info_hash,
            responder,
        } => {
            let _ = responder.send(service.keep_redundant_connections_map(info_hash));
        }

        PieceIoCommand::UpdateKeepRedundantConnectionsMap {
            info_hash,
            update,
            delete,
            responder,
        } => {
            service
                .update_keep_redundant_connections_map(info_hash, update, delete)
                .await;
            let _ = responder.send(());
        }

        PieceIoCommand::GetSequentialDownload {
            info_hash,
            responder,
        } => {
            let result = service.sequential_download(info_hash).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::SetSequentialDownload {
            info_hash,
            sequential,
            responder,
        } => {
            let result = service.set_sequential_download(info_hash, sequential).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::ReadPiece {
            info_hash,
            piece,
            responder,
        } => {
            let result = service.read_piece(info_hash, piece).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::FlushCache {
            info_hash,
            responder,
        } => {
            let result = service.flush_cache(info_hash).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::GetPiecePriorities {
            info_hash,
            responder,
        } => {
            let result = service.piece_priorities(info_hash).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::SetPieceDeadline {
            info_hash,
            piece,
            deadline,
            alert_when_available,
            responder,
        } => {
            let result = service
                .set_piece_deadline(info_hash, piece, deadline, alert_when_available)
                .await;
            let _ = responder.send(result);
        }

        PieceIoCommand::ResetPieceDeadline {
            info_hash,
            piece,
            responder,
        } => {
            let result = service.reset_piece_deadline(info_hash, piece).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::GetCacheInfo {
            info_hash,
            responder,
        } => {
            let result = service.cache_info(info_hash).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::GetSessionSettings { keys, responder } => {
            let result = service.session_settings(&keys).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::SetSessionSettings {
            settings,
            responder,
        } => {
            let result = service.apply_session_settings(settings).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::GetStatus {
            info_hash,
            fields,
            responder,
        } => {
            let result = service.status(info_hash, &fields).await;
            let _ = responder.send(result);
        }

        PieceIoCommand::Shutdown { responder } => {
            tracing::debug!("Piece I/O service actor shutting down");
            return Some(responder);
        }
    }

    None
}

async fn handle_notification<E: TorrentEngine>(
    service: &mut PieceIoService<E>,
    notification: EngineNotification,
) {
    match notification {
        EngineNotification::TorrentAdded { info_hash } => {
            service.torrent_added(info_hash).await;
        }
        EngineNotification::TorrentRemoved { info_hash } => {
            service.torrent_removed(info_hash);
        }
        EngineNotification::PieceFinished { info_hash, piece } => {
            service.piece_finished(info_hash, piece).await;
        }
        EngineNotification::ReadPieceCompleted {
            info_hash,
            piece,
            data,
            error,
        } => {
            service.read_piece_completed(info_hash, piece, data, error);
        }
        EngineNotification::CacheFlushed { info_hash, pieces } => {
            service.cache_flushed(info_hash, pieces);
        }
    }
}
