//! Per-torrent status fields offered to the host client.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reconcile::{PriorityMap, RedundantConnectionsMap};
use crate::torrent::{CacheInfo, Priority};

/// A status field the host can include in its torrent status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    PieceBitfield,
    SequentialDownload,
    PiecePriorityMap,
    KeepRedundantConnectionsMap,
    PiecePriorities,
    CacheInfo,
}

impl StatusField {
    pub const ALL: [StatusField; 6] = [
        StatusField::PieceBitfield,
        StatusField::SequentialDownload,
        StatusField::PiecePriorityMap,
        StatusField::KeepRedundantConnectionsMap,
        StatusField::PiecePriorities,
        StatusField::CacheInfo,
    ];

    /// Name under which the host publishes the field.
    pub fn name(self) -> &'static str {
        match self {
            StatusField::PieceBitfield => "pieceio.piece_bitfield",
            StatusField::SequentialDownload => "pieceio.sequential_download",
            StatusField::PiecePriorityMap => "pieceio.piece_priority_map",
            StatusField::KeepRedundantConnectionsMap => "pieceio.keep_redundant_connections_map",
            StatusField::PiecePriorities => "pieceio.piece_priorities",
            StatusField::CacheInfo => "pieceio.cache_info",
        }
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of one status field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    Bitfield(Vec<u8>),
    Flag(bool),
    PriorityMap(PriorityMap),
    RedundantConnectionsMap(RedundantConnectionsMap),
    Priorities(Vec<Priority>),
    CacheInfo(CacheInfo),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_unique() {
        let mut names: Vec<_> = StatusField::ALL.iter().map(|field| field.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StatusField::ALL.len());
        assert_eq!(StatusField::CacheInfo.to_string(), "pieceio.cache_info");
    }

    #[test]
    fn test_field_serde_name() {
        let json = serde_json::to_string(&StatusField::PiecePriorityMap).unwrap();
        assert_eq!(json, "\"piece_priority_map\"");
    }
}
