//! End-to-end tests of the service actor driven through its handle.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::broadcast;

    use crate::PieceIoError;
    use crate::config::PieceIoConfig;
    use crate::events::PieceIoEvent;
    use crate::reconcile::{PriorityMap, PrioritySpec, RedundantConnectionsMap};
    use crate::service::{
        EngineEvents, MockTorrentEngine, PieceIoHandle, StatusField, StatusProvider, StatusValue,
        start_piece_io_service,
    };
    use crate::state::test_fixtures::create_temp_config;
    use crate::torrent::{EngineError, InfoHash, PieceIndex, ReadError, SettingValue};

    const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

    fn info_hash() -> InfoHash {
        InfoHash::new([0xab; 20])
    }

    fn specs(entries: Vec<(&str, PrioritySpec)>) -> PriorityMap {
        entries
            .into_iter()
            .map(|(caller, spec)| (caller.to_string(), spec))
            .collect()
    }

    async fn next_event(events: &mut broadcast::Receiver<PieceIoEvent>) -> PieceIoEvent {
        tokio::time::timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn spawn_with_torrent(
        config: &PieceIoConfig,
        pieces: Vec<bool>,
    ) -> (MockTorrentEngine, PieceIoHandle) {
        let engine = MockTorrentEngine::new();
        engine.add_torrent(info_hash(), pieces);
        let handle = start_piece_io_service(config, engine.clone()).await;
        handle.torrent_added(info_hash());
        (engine, handle)
    }

    #[tokio::test]
    async fn test_two_callers_merge_to_max_priority() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) =
            spawn_with_torrent(&config, vec![true, false, false, false]).await;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![
                    ("a", PrioritySpec::per_piece([(1, 5), (2, 1)])),
                    ("b", PrioritySpec::Uniform(3)),
                ])),
                None,
            )
            .await
            .unwrap();

        // Piece 0 is owned and keeps the engine default.
        let priorities = handle.get_piece_priorities(info_hash()).await.unwrap();
        assert_eq!(priorities, vec![4, 5, 3, 3]);

        handle
            .update_piece_priority_map(info_hash(), None, Some(vec!["b".to_string()]))
            .await
            .unwrap();
        let priorities = handle.get_piece_priorities(info_hash()).await.unwrap();
        assert_eq!(priorities, vec![4, 5, 1, 4]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_piece_updates_merge_into_existing_spec() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) =
            spawn_with_torrent(&config, vec![true, false, false, false]).await;
        let piece = PieceIndex::new;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("stream", PrioritySpec::Uniform(2))])),
                None,
            )
            .await
            .unwrap();
        handle
            .update_caller_piece_priorities(
                info_hash(),
                "mount",
                Some(BTreeMap::from([(piece(1), 6), (piece(2), 5)])),
                None,
            )
            .await
            .unwrap();
        handle
            .update_caller_piece_priorities(
                info_hash(),
                "mount",
                Some(BTreeMap::from([(piece(3), 7)])),
                Some(vec![piece(2)]),
            )
            .await
            .unwrap();

        let map = handle.get_piece_priority_map(info_hash()).await.unwrap();
        assert_eq!(map["mount"], PrioritySpec::per_piece([(1, 6), (3, 7)]));
        assert_eq!(
            handle.get_piece_priorities(info_hash()).await.unwrap(),
            vec![4, 6, 2, 7]
        );

        // Emptying the caller's pieces drops the caller.
        handle
            .update_caller_piece_priorities(info_hash(), "mount", None, Some(vec![piece(1), piece(3)]))
            .await
            .unwrap();
        let map = handle.get_piece_priority_map(info_hash()).await.unwrap();
        assert_eq!(map, specs(vec![("stream", PrioritySpec::Uniform(2))]));
        assert_eq!(
            handle.get_piece_priorities(info_hash()).await.unwrap(),
            vec![4, 2, 2, 2]
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_per_piece_update_leaves_no_caller() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![false, false]).await;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("a", PrioritySpec::PerPiece(BTreeMap::new()))])),
                None,
            )
            .await
            .unwrap();

        assert!(
            handle
                .get_piece_priority_map(info_hash())
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            handle.get_piece_priorities(info_hash()).await.unwrap(),
            vec![4, 4]
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_removing_last_caller_restores_defaults() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![false; 3]).await;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("a", PrioritySpec::Uniform(7))])),
                None,
            )
            .await
            .unwrap();
        handle
            .update_piece_priority_map(info_hash(), None, Some(vec!["a".to_string()]))
            .await
            .unwrap();

        assert_eq!(
            handle.get_piece_priorities(info_hash()).await.unwrap(),
            vec![4, 4, 4]
        );
        assert!(
            handle
                .get_piece_priority_map(info_hash())
                .await
                .unwrap()
                .is_empty()
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_pieces_retire_from_caller_specs() {
        let (_temp_dir, config) = create_temp_config();
        let (engine, handle) = spawn_with_torrent(&config, vec![false; 3]).await;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("a", PrioritySpec::per_piece([(0, 6), (2, 6)]))])),
                None,
            )
            .await
            .unwrap();

        engine.set_have(info_hash(), PieceIndex::new(0));
        handle.piece_finished(info_hash(), PieceIndex::new(0));
        let priority_map = handle.get_piece_priority_map(info_hash()).await.unwrap();
        assert_eq!(priority_map["a"], PrioritySpec::per_piece([(2, 6)]));

        engine.set_have(info_hash(), PieceIndex::new(2));
        handle.piece_finished(info_hash(), PieceIndex::new(2));
        assert!(
            handle
                .get_piece_priority_map(info_hash())
                .await
                .unwrap()
                .is_empty()
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_read_requests_issue_one_engine_read() {
        let (_temp_dir, config) = create_temp_config();
        let (engine, handle) = spawn_with_torrent(&config, vec![true; 4]).await;
        let mut events = handle.subscribe();

        handle.read_piece(info_hash(), PieceIndex::new(1)).await.unwrap();
        handle.read_piece(info_hash(), PieceIndex::new(1)).await.unwrap();
        assert_eq!(engine.read_requests().len(), 1);

        handle.read_piece_completed(
            info_hash(),
            PieceIndex::new(1),
            Bytes::from_static(b"piece one"),
            None,
        );
        let PieceIoEvent::ReadPiece(event) = next_event(&mut events).await else {
            panic!("expected a read event");
        };
        assert_eq!(event.piece, PieceIndex::new(1));
        assert_eq!(event.data, Bytes::from_static(b"piece one"));

        // Completed reads can be requested again.
        handle.read_piece(info_hash(), PieceIndex::new(1)).await.unwrap();
        assert_eq!(engine.read_requests().len(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_completions_delivered_in_piece_order() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![true; 4]).await;
        let mut events = handle.subscribe();

        for piece in [1, 2, 3] {
            handle
                .read_piece(info_hash(), PieceIndex::new(piece))
                .await
                .unwrap();
        }
        for piece in [3, 1, 2] {
            handle.read_piece_completed(
                info_hash(),
                PieceIndex::new(piece),
                Bytes::from(vec![piece as u8; 4]),
                None,
            );
        }

        let mut delivered = Vec::new();
        for _ in 0..3 {
            if let PieceIoEvent::ReadPiece(event) = next_event(&mut events).await {
                assert_eq!(event.data[0] as u32, event.piece.as_u32());
                delivered.push(event.piece.as_u32());
            }
        }
        assert_eq!(delivered, vec![1, 2, 3]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lagging_subscriber_loses_oldest_events() {
        let (_temp_dir, mut config) = create_temp_config();
        config.service.event_capacity = 2;
        let (_engine, handle) = spawn_with_torrent(&config, vec![true; 5]).await;
        let mut events = handle.subscribe();

        for piece in 0..5u32 {
            handle.read_piece_completed(
                info_hash(),
                PieceIndex::new(piece),
                Bytes::from(vec![piece as u8; 4]),
                None,
            );
        }
        // Notifications are handled before any later command.
        handle.get_piece_priority_map(info_hash()).await.unwrap();

        assert!(matches!(
            events.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        for expected in [3, 4] {
            let PieceIoEvent::ReadPiece(event) = next_event(&mut events).await else {
                panic!("expected a read event");
            };
            assert_eq!(event.piece, PieceIndex::new(expected));
        }

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_is_delivered_with_event() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![true; 2]).await;
        let mut events = handle.subscribe();

        handle.read_piece(info_hash(), PieceIndex::new(0)).await.unwrap();
        let error = ReadError {
            message: "no such file".to_string(),
            value: 2,
        };
        handle.read_piece_completed(
            info_hash(),
            PieceIndex::new(0),
            Bytes::new(),
            Some(error.clone()),
        );

        let PieceIoEvent::ReadPiece(event) = next_event(&mut events).await else {
            panic!("expected a read event");
        };
        assert_eq!(event.error, Some(error));
        assert!(event.data.is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_read_returns_engine_error() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![true; 2]).await;

        let result = handle.read_piece(info_hash(), PieceIndex::new(5)).await;
        assert!(matches!(
            result,
            Err(PieceIoError::Engine(EngineError::InvalidPiece { .. }))
        ));

        let unknown = InfoHash::new([0x11; 20]);
        let result = handle.read_piece(unknown, PieceIndex::new(0)).await;
        assert!(matches!(
            result,
            Err(PieceIoError::Engine(EngineError::TorrentNotFound { .. }))
        ));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_then_add_starts_with_empty_state() {
        let (_temp_dir, config) = create_temp_config();
        let (engine, handle) = spawn_with_torrent(&config, vec![false; 2]).await;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("a", PrioritySpec::Uniform(2))])),
                None,
            )
            .await
            .unwrap();
        let mut flags = RedundantConnectionsMap::new();
        flags.insert("a".to_string(), true);
        handle
            .update_keep_redundant_connections_map(info_hash(), Some(flags), None)
            .await
            .unwrap();

        handle.torrent_removed(info_hash());
        engine.remove_torrent(info_hash());
        engine.add_torrent(info_hash(), vec![false; 2]);
        handle.torrent_added(info_hash());

        assert!(
            handle
                .get_piece_priority_map(info_hash())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            handle
                .get_keep_redundant_connections_map(info_hash())
                .await
                .unwrap()
                .is_empty()
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_priorities_survive_restart() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![false; 3]).await;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("mount", PrioritySpec::per_piece([(2, 7)]))])),
                None,
            )
            .await
            .unwrap();
        handle.shutdown().await.unwrap();

        let (engine, handle) = spawn_with_torrent(&config, vec![false; 3]).await;
        assert_eq!(
            handle.get_piece_priority_map(info_hash()).await.unwrap()["mount"],
            PrioritySpec::per_piece([(2, 7)])
        );
        assert_eq!(
            engine.last_prioritized(info_hash()),
            Some(vec![(PieceIndex::new(2), 7)])
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_removed_torrent_is_not_persisted() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![false; 3]).await;

        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("a", PrioritySpec::Uniform(1))])),
                None,
            )
            .await
            .unwrap();
        handle.torrent_removed(info_hash());
        handle.shutdown().await.unwrap();

        let restored = crate::state::load_snapshot(&config.state.path)
            .await
            .unwrap();
        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn test_keep_redundant_connections_is_or_of_callers() {
        let (_temp_dir, config) = create_temp_config();
        let (engine, handle) = spawn_with_torrent(&config, vec![false]).await;

        let mut flags = RedundantConnectionsMap::new();
        flags.insert("a".to_string(), false);
        flags.insert("b".to_string(), true);
        handle
            .update_keep_redundant_connections_map(info_hash(), Some(flags.clone()), None)
            .await
            .unwrap();
        assert_eq!(engine.keep_redundant_connections(info_hash()), Some(true));
        assert_eq!(
            handle
                .get_keep_redundant_connections_map(info_hash())
                .await
                .unwrap(),
            flags
        );

        handle
            .update_keep_redundant_connections_map(info_hash(), None, Some(vec!["b".to_string()]))
            .await
            .unwrap();
        assert_eq!(engine.keep_redundant_connections(info_hash()), Some(false));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_passthrough_operations() {
        let (_temp_dir, config) = create_temp_config();
        let (engine, handle) = spawn_with_torrent(&config, vec![true, false, true]).await;

        assert_eq!(
            handle.get_piece_bitfield(info_hash()).await.unwrap(),
            vec![0b1010_0000]
        );
        assert_eq!(handle.get_pieces(info_hash()).await.unwrap(), vec![1, 0, 1]);

        handle
            .set_sequential_download(info_hash(), true)
            .await
            .unwrap();
        assert!(handle.get_sequential_download(info_hash()).await.unwrap());

        handle
            .set_piece_deadline(info_hash(), PieceIndex::new(1), Duration::from_millis(500), true)
            .await
            .unwrap();
        assert_eq!(
            engine.deadline(info_hash(), PieceIndex::new(1)),
            Some(Duration::from_millis(500))
        );
        handle
            .reset_piece_deadline(info_hash(), PieceIndex::new(1))
            .await
            .unwrap();
        assert_eq!(engine.deadline(info_hash(), PieceIndex::new(1)), None);

        let cache = handle.get_cache_info(info_hash()).await.unwrap();
        assert_eq!(cache.blocks_written, 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_flush_emits_event() {
        let (_temp_dir, config) = create_temp_config();
        let (engine, handle) = spawn_with_torrent(&config, vec![true; 2]).await;
        let mut events = handle.subscribe();

        handle.flush_cache(info_hash()).await.unwrap();
        assert_eq!(engine.flushes(), vec![info_hash()]);

        handle.cache_flushed(info_hash(), None);
        let PieceIoEvent::CacheFlushed(event) = next_event(&mut events).await else {
            panic!("expected a cache flushed event");
        };
        assert_eq!(event.info_hash, info_hash());
        assert_eq!(event.pieces, None);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_settings() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![true]).await;

        let mut settings = BTreeMap::new();
        settings.insert("cache_size".to_string(), SettingValue::Int(2048));
        handle.session_set_settings(settings).await.unwrap();

        let values = handle
            .session_get_settings(vec!["cache_size".to_string()])
            .await
            .unwrap();
        assert_eq!(values["cache_size"], SettingValue::Int(2048));

        let result = handle
            .session_get_settings(vec!["no_such_setting".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(PieceIoError::Engine(EngineError::UnknownSetting { .. }))
        ));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_provider_reports_fields() {
        let (_temp_dir, config) = create_temp_config();
        let (_engine, handle) = spawn_with_torrent(&config, vec![false, true]).await;
        handle
            .update_piece_priority_map(
                info_hash(),
                Some(specs(vec![("a", PrioritySpec::Uniform(5))])),
                None,
            )
            .await
            .unwrap();

        let fields = handle.status_fields();
        let status = handle.status(info_hash(), fields).await.unwrap();

        assert_eq!(status.len(), StatusField::ALL.len());
        assert_eq!(
            status[&StatusField::PieceBitfield],
            StatusValue::Bitfield(vec![0b0100_0000])
        );
        assert_eq!(
            status[&StatusField::PiecePriorities],
            StatusValue::Priorities(vec![5, 4])
        );
        assert_eq!(
            status[&StatusField::PiecePriorityMap],
            StatusValue::PriorityMap(specs(vec![("a", PrioritySpec::Uniform(5))]))
        );

        handle.shutdown().await.unwrap();
    }
}
