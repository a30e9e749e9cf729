//! Ordered delivery of asynchronous piece reads.
//!
//! The engine completes reads in whatever order its disk threads finish.
//! Subscribers reading a torrent front to back want them in piece order, so
//! completions are buffered and released only once every lower pending piece
//! has completed too.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use tracing::debug;

use crate::events::ReadPieceEvent;
use crate::torrent::{InfoHash, PieceIndex, ReadError};

/// State of one requested piece read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRead {
    Awaiting,
    Complete {
        data: Bytes,
        error: Option<ReadError>,
    },
}

/// Per-torrent pending reads.
///
/// Torrents announced through [`PendingReadTracker::track`] keep their entry
/// until removed. Entries created by a request for any other torrent are
/// dropped again as soon as they hold no reads.
#[derive(Debug, Default)]
pub struct PendingReadTracker {
    pending: HashMap<InfoHash, BTreeMap<PieceIndex, PendingRead>>,
    tracked: HashSet<InfoHash>,
}

impl PendingReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking the torrent with no reads outstanding.
    pub fn track(&mut self, info_hash: InfoHash) {
        self.pending.insert(info_hash, BTreeMap::new());
        self.tracked.insert(info_hash);
    }

    pub fn remove(&mut self, info_hash: InfoHash) {
        self.pending.remove(&info_hash);
        self.tracked.remove(&info_hash);
    }

    /// Registers a read request.
    ///
    /// Returns false when the piece is already awaiting or awaiting delivery,
    /// in which case no engine read must be issued.
    pub fn request(&mut self, info_hash: InfoHash, piece: PieceIndex) -> bool {
        let reads = self.pending.entry(info_hash).or_default();
        if reads.contains_key(&piece) {
            debug!("Read of piece {piece} for {info_hash} already in flight");
            return false;
        }
        reads.insert(piece, PendingRead::Awaiting);
        true
    }

    /// Forgets a request the engine refused to start.
    ///
    /// Returns completions that the cancelled read was holding back.
    pub fn cancel(&mut self, info_hash: InfoHash, piece: PieceIndex) -> Vec<ReadPieceEvent> {
        let Some(reads) = self.pending.get_mut(&info_hash) else {
            return Vec::new();
        };
        if reads.get(&piece) == Some(&PendingRead::Awaiting) {
            reads.remove(&piece);
        }
        let ready = drain_ready(info_hash, reads);
        self.release_if_idle(info_hash);
        ready
    }

    /// Records a finished read and returns the events now deliverable.
    ///
    /// Events come out in ascending piece order, starting at the lowest
    /// pending piece and stopping at the first one still awaiting.
    pub fn complete(
        &mut self,
        info_hash: InfoHash,
        piece: PieceIndex,
        data: Bytes,
        error: Option<ReadError>,
    ) -> Vec<ReadPieceEvent> {
        let Some(reads) = self.pending.get_mut(&info_hash) else {
            debug!("Dropping read of piece {piece} for untracked torrent {info_hash}");
            return Vec::new();
        };
        reads.insert(piece, PendingRead::Complete { data, error });
        let ready = drain_ready(info_hash, reads);
        self.release_if_idle(info_hash);
        ready
    }

    /// Number of reads requested or buffered for the torrent.
    pub fn pending(&self, info_hash: InfoHash) -> usize {
        self.pending.get(&info_hash).map_or(0, BTreeMap::len)
    }

    /// Number of torrents holding an entry, tracked or not.
    pub fn torrent_count(&self) -> usize {
        self.pending.len()
    }

    fn release_if_idle(&mut self, info_hash: InfoHash) {
        if self.tracked.contains(&info_hash) {
            return;
        }
        if self.pending.get(&info_hash).is_some_and(BTreeMap::is_empty) {
            self.pending.remove(&info_hash);
        }
    }
}

fn drain_ready(
    info_hash: InfoHash,
    reads: &mut BTreeMap<PieceIndex, PendingRead>,
) -> Vec<ReadPieceEvent> {
    let mut ready = Vec::new();
    while let Some(entry) = reads.first_entry() {
        if *entry.get() == PendingRead::Awaiting {
            break;
        }
        let (piece, read) = entry.remove_entry();
        if let PendingRead::Complete { data, error } = read {
            ready.push(ReadPieceEvent {
                info_hash,
                piece,
                data,
                error,
            });
        }
    }
    ready
}
