//! Mock download engine for testing the piece I/O service.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::torrent::{
    CacheInfo, EngineError, InfoHash, PieceIndex, Priority, SettingValue, TorrentEngine,
    TorrentStatus,
};

/// Priority the mock assigns to pieces nobody prioritized.
pub const DEFAULT_PIECE_PRIORITY: Priority = 4;

#[derive(Debug, Default)]
struct MockTorrent {
    pieces: Vec<bool>,
    priorities: Vec<Priority>,
    sequential_download: bool,
    keep_redundant_connections: bool,
    deadlines: BTreeMap<PieceIndex, Duration>,
    cache: CacheInfo,
}

#[derive(Debug, Default)]
struct MockState {
    torrents: HashMap<InfoHash, MockTorrent>,
    prioritize_calls: Vec<(InfoHash, Vec<(PieceIndex, Priority)>)>,
    read_requests: Vec<(InfoHash, PieceIndex)>,
    flushes: Vec<InfoHash>,
    settings: BTreeMap<String, SettingValue>,
}

/// In-memory download engine that records every call.
///
/// Clones share state, so a test can keep one clone while the service owns
/// another. Reads and flushes are only recorded; tests deliver their
/// completions through `EngineEvents` themselves.
#[derive(Debug, Clone)]
pub struct MockTorrentEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockTorrentEngine {
    /// Creates a mock engine with no torrents and a small settings table.
    pub fn new() -> Self {
        let mut state = MockState::default();
        state
            .settings
            .insert("cache_size".to_string(), SettingValue::Int(1024));
        state
            .settings
            .insert("enable_dht".to_string(), SettingValue::Bool(true));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Adds a torrent with the given have-flags.
    pub fn add_torrent(&self, info_hash: InfoHash, pieces: Vec<bool>) {
        let priorities = vec![DEFAULT_PIECE_PRIORITY; pieces.len()];
        self.state.lock().torrents.insert(
            info_hash,
            MockTorrent {
                pieces,
                priorities,
                ..Default::default()
            },
        );
    }

    pub fn remove_torrent(&self, info_hash: InfoHash) {
        self.state.lock().torrents.remove(&info_hash);
    }

    /// Marks a piece as downloaded and verified.
    pub fn set_have(&self, info_hash: InfoHash, piece: PieceIndex) {
        if let Some(torrent) = self.state.lock().torrents.get_mut(&info_hash) {
            if let Some(have) = torrent.pieces.get_mut(piece.as_usize()) {
                *have = true;
            }
        }
    }

    /// Every `prioritize_pieces` call in order.
    pub fn prioritize_calls(&self) -> Vec<(InfoHash, Vec<(PieceIndex, Priority)>)> {
        self.state.lock().prioritize_calls.clone()
    }

    /// Pairs of the most recent `prioritize_pieces` call for the torrent.
    pub fn last_prioritized(&self, info_hash: InfoHash) -> Option<Vec<(PieceIndex, Priority)>> {
        self.state
            .lock()
            .prioritize_calls
            .iter()
            .rev()
            .find(|(hash, _)| *hash == info_hash)
            .map(|(_, pairs)| pairs.clone())
    }

    pub fn read_requests(&self) -> Vec<(InfoHash, PieceIndex)> {
        self.state.lock().read_requests.clone()
    }

    pub fn flushes(&self) -> Vec<InfoHash> {
        self.state.lock().flushes.clone()
    }

    pub fn keep_redundant_connections(&self, info_hash: InfoHash) -> Option<bool> {
        self.state
            .lock()
            .torrents
            .get(&info_hash)
            .map(|torrent| torrent.keep_redundant_connections)
    }

    pub fn deadline(&self, info_hash: InfoHash, piece: PieceIndex) -> Option<Duration> {
        self.state
            .lock()
            .torrents
            .get(&info_hash)
            .and_then(|torrent| torrent.deadlines.get(&piece).copied())
    }
}

impl Default for MockTorrentEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn torrent_mut(
    state: &mut MockState,
    info_hash: InfoHash,
) -> Result<&mut MockTorrent, EngineError> {
    state
        .torrents
        .get_mut(&info_hash)
        .ok_or(EngineError::TorrentNotFound { info_hash })
}

fn check_piece(torrent: &MockTorrent, info_hash: InfoHash, piece: PieceIndex) -> Result<(), EngineError> {
    if piece.as_usize() >= torrent.pieces.len() {
        return Err(EngineError::InvalidPiece { info_hash, piece });
    }
    Ok(())
}

#[async_trait]
impl TorrentEngine for MockTorrentEngine {
    async fn status(&self, info_hash: InfoHash) -> Result<TorrentStatus, EngineError> {
        let mut state = self.state.lock();
        let torrent = torrent_mut(&mut state, info_hash)?;
        Ok(TorrentStatus {
            pieces: torrent.pieces.clone(),
            sequential_download: torrent.sequential_download,
        })
    }

    async fn prioritize_pieces(
        &mut self,
        info_hash: InfoHash,
        priorities: Vec<(PieceIndex, Priority)>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let torrent = torrent_mut(&mut state, info_hash)?;

        torrent.priorities = vec![DEFAULT_PIECE_PRIORITY; torrent.pieces.len()];
        for (piece, priority) in &priorities {
            if let Some(slot) = torrent.priorities.get_mut(piece.as_usize()) {
                *slot = *priority;
            }
        }
        state.prioritize_calls.push((info_hash, priorities));
        Ok(())
    }

    async fn piece_priorities(&self, info_hash: InfoHash) -> Result<Vec<Priority>, EngineError> {
        let mut state = self.state.lock();
        Ok(torrent_mut(&mut state, info_hash)?.priorities.clone())
    }

    async fn set_sequential_download(
        &mut self,
        info_hash: InfoHash,
        sequential: bool,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        torrent_mut(&mut state, info_hash)?.sequential_download = sequential;
        Ok(())
    }

    async fn set_keep_redundant_connections(
        &mut self,
        info_hash: InfoHash,
        keep: bool,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        torrent_mut(&mut state, info_hash)?.keep_redundant_connections = keep;
        Ok(())
    }

    async fn read_piece(&mut self, info_hash: InfoHash, piece: PieceIndex) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        check_piece(torrent_mut(&mut state, info_hash)?, info_hash, piece)?;
        state.read_requests.push((info_hash, piece));
        Ok(())
    }

    async fn flush_cache(&mut self, info_hash: InfoHash) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        torrent_mut(&mut state, info_hash)?;
        state.flushes.push(info_hash);
        Ok(())
    }

    async fn set_piece_deadline(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
        deadline: Duration,
        _alert_when_available: bool,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let torrent = torrent_mut(&mut state, info_hash)?;
        check_piece(torrent, info_hash, piece)?;
        torrent.deadlines.insert(piece, deadline);
        Ok(())
    }

    async fn reset_piece_deadline(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let torrent = torrent_mut(&mut state, info_hash)?;
        check_piece(torrent, info_hash, piece)?;
        torrent.deadlines.remove(&piece);
        Ok(())
    }

    async fn cache_info(&self, info_hash: InfoHash) -> Result<CacheInfo, EngineError> {
        let mut state = self.state.lock();
        Ok(torrent_mut(&mut state, info_hash)?.cache.clone())
    }

    async fn settings(&self, keys: &[String]) -> Result<BTreeMap<String, SettingValue>, EngineError> {
        let state = self.state.lock();
        keys.iter()
            .map(|key| {
                state
                    .settings
                    .get(key)
                    .map(|value| (key.clone(), value.clone()))
                    .ok_or_else(|| EngineError::UnknownSetting { key: key.clone() })
            })
            .collect()
    }

    async fn apply_settings(
        &mut self,
        settings: BTreeMap<String, SettingValue>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if let Some(key) = settings.keys().find(|key| !state.settings.contains_key(*key)) {
            return Err(EngineError::UnknownSetting { key: key.clone() });
        }
        state.settings.extend(settings);
        Ok(())
    }
}
