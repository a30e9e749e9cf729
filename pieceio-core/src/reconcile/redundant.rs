//! Keep-redundant-connections flag merged across callers.
//!
//! Any caller asking for redundant connections to be kept wins.

use std::collections::{BTreeMap, HashMap};

use crate::torrent::InfoHash;

/// Caller key to requested flag, for one torrent.
pub type RedundantConnectionsMap = BTreeMap<String, bool>;

#[derive(Debug, Default)]
pub struct RedundantConnections {
    flags: HashMap<InfoHash, RedundantConnectionsMap>,
}

impl RedundantConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates empty state for the torrent.
    ///
    /// Returns true if callers had already written flags before the torrent
    /// was added.
    pub fn ensure(&mut self, info_hash: InfoHash) -> bool {
        if self.flags.contains_key(&info_hash) {
            return true;
        }
        self.flags.insert(info_hash, RedundantConnectionsMap::new());
        false
    }

    /// Merges `update` into the torrent's flags, drops the callers in
    /// `delete` and returns the effective flag.
    pub fn update(
        &mut self,
        info_hash: InfoHash,
        update: Option<RedundantConnectionsMap>,
        delete: Option<Vec<String>>,
    ) -> bool {
        let flags = self.flags.entry(info_hash).or_default();
        if let Some(update) = update {
            flags.extend(update);
        }
        for caller in delete.into_iter().flatten() {
            flags.remove(&caller);
        }
        self.keep_redundant(info_hash)
    }

    /// Logical OR over every caller's flag.
    pub fn keep_redundant(&self, info_hash: InfoHash) -> bool {
        self.flags
            .get(&info_hash)
            .is_some_and(|flags| flags.values().any(|&keep| keep))
    }

    pub fn flags(&self, info_hash: InfoHash) -> RedundantConnectionsMap {
        self.flags.get(&info_hash).cloned().unwrap_or_default()
    }

    pub fn remove(&mut self, info_hash: InfoHash) -> Option<RedundantConnectionsMap> {
        self.flags.remove(&info_hash)
    }
}
