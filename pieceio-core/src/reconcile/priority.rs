//! Multi-caller piece priority reconciliation.
//!
//! Every caller (a filesystem mount, a user session, a feature module) owns
//! one [`PrioritySpec`] per torrent under a caller key. The reconciler merges
//! all of them into the single vector the engine understands: for each piece
//! not yet on disk, the highest priority any caller asked for. Pieces nobody
//! asked for are left out so the engine default applies.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::torrent::{InfoHash, PieceIndex, Priority};

/// Priority request of a single caller for one torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrioritySpec {
    /// Same priority for every piece not yet owned.
    Uniform(Priority),
    /// Priorities for an arbitrary subset of pieces.
    PerPiece(BTreeMap<PieceIndex, Priority>),
}

impl PrioritySpec {
    /// Builds a per-piece spec from `(piece, priority)` pairs.
    pub fn per_piece(pieces: impl IntoIterator<Item = (u32, Priority)>) -> Self {
        Self::PerPiece(
            pieces
                .into_iter()
                .map(|(piece, priority)| (PieceIndex::new(piece), priority))
                .collect(),
        )
    }
}

/// Caller key to spec, for one torrent.
pub type PriorityMap = BTreeMap<String, PrioritySpec>;

/// Every torrent's priority map; the persisted unit.
pub type PrioritySnapshot = BTreeMap<InfoHash, PriorityMap>;

/// Merged piece priorities to hand to the engine.
pub type EffectivePriorities = BTreeMap<PieceIndex, Priority>;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Effective priority per non-owned piece that some caller asked for
    pub priorities: EffectivePriorities,
    /// Whether stored specs were pruned during the pass
    pub pruned: bool,
}

impl Reconciliation {
    /// Priorities as the pair list accepted by the engine.
    pub fn into_pairs(self) -> Vec<(PieceIndex, Priority)> {
        self.priorities.into_iter().collect()
    }
}

/// Per-torrent store of caller priority specs.
///
/// Not synchronized: it lives inside the service actor and is only touched
/// from that task.
#[derive(Debug, Default)]
pub struct PriorityReconciler {
    specs: HashMap<InfoHash, PriorityMap>,
}

impl PriorityReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores state loaded from disk.
    pub fn from_snapshot(snapshot: PrioritySnapshot) -> Self {
        Self {
            specs: snapshot.into_iter().collect(),
        }
    }

    /// Deep copy of every torrent's specs for persistence.
    pub fn snapshot(&self) -> PrioritySnapshot {
        self.specs
            .iter()
            .map(|(info_hash, specs)| (*info_hash, specs.clone()))
            .collect()
    }

    /// Returns true if any caller specs are stored for the torrent.
    pub fn contains(&self, info_hash: InfoHash) -> bool {
        self.specs.contains_key(&info_hash)
    }

    /// Caller specs stored for the torrent, empty when there are none.
    pub fn priority_map(&self, info_hash: InfoHash) -> PriorityMap {
        self.specs.get(&info_hash).cloned().unwrap_or_default()
    }

    /// Replaces the specs of the callers in `update` and drops the callers
    /// named in `delete`.
    ///
    /// Works for torrents the engine does not know yet; their specs are
    /// applied once the torrent is added. Per-piece specs given without any
    /// pieces are dropped instead of stored.
    pub fn update(
        &mut self,
        info_hash: InfoHash,
        update: Option<PriorityMap>,
        delete: Option<Vec<String>>,
    ) {
        let specs = self.specs.entry(info_hash).or_default();
        if let Some(update) = update {
            specs.extend(update);
        }
        for caller in delete.into_iter().flatten() {
            specs.remove(&caller);
        }
        specs.retain(|_, spec| !is_empty_per_piece(spec));

        if specs.is_empty() {
            self.specs.remove(&info_hash);
        }
    }

    /// Merges `update` into one caller's per-piece priorities and removes the
    /// pieces in `delete`.
    ///
    /// The caller is created when absent. A uniform spec is turned into a
    /// per-piece one only when `update` carries pieces; deleting pieces
    /// leaves it alone. A caller left with no pieces is dropped, and so is
    /// the torrent once no caller remains.
    pub fn update_caller(
        &mut self,
        info_hash: InfoHash,
        caller: &str,
        update: Option<BTreeMap<PieceIndex, Priority>>,
        delete: Option<Vec<PieceIndex>>,
    ) {
        let update = update.unwrap_or_default();
        let specs = self.specs.entry(info_hash).or_default();

        if let Some(spec) = specs.get_mut(caller) {
            if matches!(spec, PrioritySpec::Uniform(_)) && !update.is_empty() {
                debug!("Replacing uniform priority of {caller} for {info_hash} with per-piece");
                *spec = PrioritySpec::PerPiece(BTreeMap::new());
            }
        } else {
            specs.insert(caller.to_string(), PrioritySpec::PerPiece(BTreeMap::new()));
        }

        if let Some(PrioritySpec::PerPiece(pieces)) = specs.get_mut(caller) {
            pieces.extend(update);
            for piece in delete.into_iter().flatten() {
                pieces.remove(&piece);
            }
            if pieces.is_empty() {
                specs.remove(caller);
            }
        }

        if specs.is_empty() {
            self.specs.remove(&info_hash);
        }
    }

    /// Drops every spec for the torrent.
    pub fn remove(&mut self, info_hash: InfoHash) -> Option<PriorityMap> {
        self.specs.remove(&info_hash)
    }

    /// Merges the torrent's specs against its have-bitfield.
    ///
    /// Per-piece entries for owned pieces, for pieces outside the torrent and
    /// with negative priorities are deleted from the stored specs, and a
    /// per-piece spec left empty is deleted entirely. Once every piece is
    /// owned or no caller remains, the torrent's specs are cleared.
    ///
    /// An empty `have` means the piece count is not known yet; nothing is
    /// touched in that case.
    pub fn reconcile(&mut self, info_hash: InfoHash, have: &[bool]) -> Reconciliation {
        let mut reconciliation = Reconciliation::default();
        if have.is_empty() {
            return reconciliation;
        }
        let Some(specs) = self.specs.get_mut(&info_hash) else {
            return reconciliation;
        };

        let mut pruned = false;
        specs.retain(|caller, spec| match spec {
            PrioritySpec::Uniform(_) => true,
            PrioritySpec::PerPiece(pieces) => {
                let before = pieces.len();
                pieces.retain(|piece, priority| {
                    *priority >= 0 && have.get(piece.as_usize()) == Some(&false)
                });
                pruned |= pieces.len() != before;

                if pieces.is_empty() {
                    debug!("Dropping satisfied priority spec {caller} for {info_hash}");
                    pruned = true;
                    return false;
                }
                true
            }
        });

        let priorities = &mut reconciliation.priorities;
        for spec in specs.values() {
            match spec {
                PrioritySpec::Uniform(priority) if *priority >= 0 => {
                    let wanted = have
                        .iter()
                        .enumerate()
                        .filter(|(_, owned)| !**owned)
                        .map(|(piece, _)| PieceIndex::new(piece as u32));
                    for piece in wanted {
                        raise(priorities, piece, *priority);
                    }
                }
                PrioritySpec::Uniform(_) => {}
                PrioritySpec::PerPiece(pieces) => {
                    for (piece, priority) in pieces {
                        raise(priorities, *piece, *priority);
                    }
                }
            }
        }

        if specs.is_empty() || have.iter().all(|&owned| owned) {
            debug!("Clearing priority specs for {info_hash}");
            self.specs.remove(&info_hash);
            pruned = true;
        }

        reconciliation.pruned = pruned;
        reconciliation
    }
}

fn is_empty_per_piece(spec: &PrioritySpec) -> bool {
    matches!(spec, PrioritySpec::PerPiece(pieces) if pieces.is_empty())
}

fn raise(priorities: &mut EffectivePriorities, piece: PieceIndex, priority: Priority) {
    priorities
        .entry(piece)
        .and_modify(|current| *current = (*current).max(priority))
        .or_insert(priority);
}
