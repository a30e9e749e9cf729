//! Merging of independent caller requests into one engine setting per torrent.

pub mod priority;
pub mod redundant;

pub use priority::{
    EffectivePriorities, PriorityMap, PriorityReconciler, PrioritySnapshot, PrioritySpec,
    Reconciliation,
};
pub use redundant::{RedundantConnections, RedundantConnectionsMap};
