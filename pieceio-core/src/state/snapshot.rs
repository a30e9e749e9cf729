//! On-disk encoding of the priority snapshot.
//!
//! The file is a JSON object keyed by hex info hash. Each value maps caller
//! keys to externally tagged specs:
//!
//! ```json
//! {
//!   "0123456789abcdef0123456789abcdef01234567": {
//!     "mount-a": { "per_piece": { "1": 5, "2": 1 } },
//!     "session-b": { "uniform": 3 }
//!   }
//! }
//! ```

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use super::StateError;
use crate::reconcile::{PriorityMap, PrioritySnapshot, PrioritySpec};
use crate::torrent::InfoHash;

/// Serializes a snapshot to pretty-printed JSON.
///
/// # Errors
/// - `StateError::Serialization` - Snapshot could not be encoded
pub fn encode_snapshot(snapshot: &PrioritySnapshot) -> Result<Vec<u8>, StateError> {
    Ok(serde_json::to_vec_pretty(snapshot)?)
}

/// Parses a snapshot, skipping entries that do not decode.
///
/// A torrent key that is not an info hash, or a caller spec that is neither a
/// uniform priority nor a piece map, is dropped with a warning rather than
/// failing the whole load.
///
/// # Errors
/// - `StateError::Serialization` - Input is not JSON
/// - `StateError::InvalidFormat` - Top-level value is not an object
pub fn decode_snapshot(bytes: &[u8]) -> Result<PrioritySnapshot, StateError> {
    let Value::Object(torrents) = serde_json::from_slice(bytes)? else {
        return Err(StateError::InvalidFormat {
            reason: "top-level value is not an object".to_string(),
        });
    };

    let mut snapshot = PrioritySnapshot::new();
    for (key, specs) in torrents {
        let info_hash: InfoHash = match key.parse() {
            Ok(info_hash) => info_hash,
            Err(e) => {
                warn!("Skipping persisted priorities: {e}");
                continue;
            }
        };
        let Value::Object(specs) = specs else {
            warn!("Skipping persisted priorities for {info_hash}: not an object");
            continue;
        };

        let mut priority_map = PriorityMap::new();
        for (caller, spec) in specs {
            match serde_json::from_value::<PrioritySpec>(spec) {
                Ok(spec) => {
                    priority_map.insert(caller, spec);
                }
                Err(e) => warn!("Skipping malformed priority spec {caller} for {info_hash}: {e}"),
            }
        }

        if !priority_map.is_empty() {
            snapshot.insert(info_hash, priority_map);
        }
    }

    Ok(snapshot)
}

/// Reads and decodes the state file.
///
/// # Errors
/// - `StateError::Io` - File missing or unreadable
/// - `StateError::Serialization` - File is not JSON
/// - `StateError::InvalidFormat` - File is not a snapshot object
pub async fn load_snapshot(path: &Path) -> Result<PrioritySnapshot, StateError> {
    let bytes = tokio::fs::read(path).await?;
    decode_snapshot(&bytes)
}
