//! Background persistence of the priority snapshot.
//!
//! One worker task owns the state file. Callers hand it snapshots through a
//! single-slot mailbox where the newest snapshot replaces any the worker has
//! not picked up yet, so at most one write is in flight and at most one is
//! queued no matter how often callers save.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::StateError;
use super::snapshot::{encode_snapshot, load_snapshot};
use crate::config::StateConfig;
use crate::reconcile::PrioritySnapshot;

/// Destination of persisted snapshots.
#[async_trait]
pub trait SnapshotWriter: Send + 'static {
    /// Durably stores `snapshot`, replacing the previous one.
    ///
    /// # Errors
    /// - `StateError::Io` - Destination could not be written
    /// - `StateError::Serialization` - Snapshot could not be encoded
    async fn write(&mut self, snapshot: &PrioritySnapshot) -> Result<(), StateError>;
}

/// Writes snapshots to the state file via a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileSnapshotWriter {
    path: PathBuf,
    temp_path: PathBuf,
}

impl FileSnapshotWriter {
    pub fn new(config: &StateConfig) -> Self {
        Self {
            path: config.path.clone(),
            temp_path: config.temp_path(),
        }
    }
}

#[async_trait]
impl SnapshotWriter for FileSnapshotWriter {
    async fn write(&mut self, snapshot: &PrioritySnapshot) -> Result<(), StateError> {
        let encoded = encode_snapshot(snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(&self.temp_path, &encoded).await?;
        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Err(e.into());
        }

        debug!(
            "Persisted priorities for {} torrents to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Handle to the background state writer.
pub struct StateStore {
    mailbox: watch::Sender<Option<PrioritySnapshot>>,
    worker: JoinHandle<()>,
}

impl StateStore {
    /// Spawns the writer task around `writer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<W: SnapshotWriter>(writer: W) -> Self {
        let (mailbox, receiver) = watch::channel(None);
        let worker = tokio::spawn(run_writer_loop(writer, receiver));
        Self { mailbox, worker }
    }

    /// Loads the state file and starts a writer for it.
    ///
    /// A missing or unreadable file yields an empty snapshot; startup never
    /// fails on persisted state.
    pub async fn open(config: &StateConfig) -> (Self, PrioritySnapshot) {
        let snapshot = match load_snapshot(&config.path).await {
            Ok(snapshot) => {
                info!(
                    "Loaded priorities for {} torrents from {}",
                    snapshot.len(),
                    config.path.display()
                );
                snapshot
            }
            Err(StateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting empty", config.path.display());
                PrioritySnapshot::new()
            }
            Err(e) => {
                warn!(
                    "Failed to load {}, starting empty: {e}",
                    config.path.display()
                );
                PrioritySnapshot::new()
            }
        };

        (Self::spawn(FileSnapshotWriter::new(config)), snapshot)
    }

    /// Queues `snapshot` for writing without waiting for disk I/O.
    pub fn save(&self, snapshot: PrioritySnapshot) {
        self.mailbox.send_replace(Some(snapshot));
    }

    /// Stops the writer once the latest queued snapshot is on disk.
    ///
    /// A write already in progress is always completed.
    pub async fn shutdown(self) {
        drop(self.mailbox);
        if let Err(e) = self.worker.await {
            warn!("State writer terminated abnormally: {e}");
        }
    }
}

async fn run_writer_loop<W: SnapshotWriter>(
    mut writer: W,
    mut receiver: watch::Receiver<Option<PrioritySnapshot>>,
) {
    debug!("State writer started");

    // `changed` still reports a value queued before the sender was dropped.
    while receiver.changed().await.is_ok() {
        let snapshot = receiver.borrow_and_update().clone();
        let Some(snapshot) = snapshot else {
            continue;
        };
        if let Err(e) = writer.write(&snapshot).await {
            warn!("Failed to persist priorities: {e}");
        }
    }

    debug!("State writer stopped");
}
