//! CLI command implementations

use std::fmt::Write as _;

use anyhow::{Context, bail};
use clap::Subcommand;
use pieceio_core::config::PieceIoConfig;
use pieceio_core::reconcile::{PriorityReconciler, PrioritySnapshot};
use pieceio_core::state::{FileSnapshotWriter, SnapshotWriter, StateError, load_snapshot};
use pieceio_core::torrent::{InfoHash, decode_bitfield};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print the persisted priority maps as JSON
    Show {
        /// Only show this torrent (hex info hash)
        torrent: Option<String>,
    },
    /// Drop every caller's priorities for a torrent
    Remove {
        /// Torrent info hash
        torrent: String,
    },
    /// Drop one caller's priorities for a torrent
    RemoveCaller {
        /// Torrent info hash
        torrent: String,
        /// Caller key to drop
        caller: String,
    },
    /// Compute the priorities the engine would receive for a torrent
    Effective {
        /// Torrent info hash
        torrent: String,
        /// Number of pieces in the torrent
        #[arg(short, long)]
        pieces: usize,
        /// Hex have-bitfield; pieces are treated as missing when omitted
        #[arg(long)]
        have: Option<String>,
    },
    /// Decode a hex piece bitfield into one 0/1 flag per piece
    Bitfield {
        /// Hex-encoded bitfield, piece 0 in the high bit of the first byte
        bitfield: String,
        /// Number of pieces in the torrent
        #[arg(short, long)]
        pieces: usize,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns an error if the state file cannot be read or written, or if an
/// argument does not parse.
pub async fn handle_command(command: Commands, config: &PieceIoConfig) -> anyhow::Result<()> {
    let output = match command {
        Commands::Show { torrent } => show_state(config, torrent.as_deref()).await?,
        Commands::Remove { torrent } => remove_torrent(config, &torrent).await?,
        Commands::RemoveCaller { torrent, caller } => {
            remove_caller(config, &torrent, &caller).await?
        }
        Commands::Effective {
            torrent,
            pieces,
            have,
        } => effective_priorities(config, &torrent, pieces, have.as_deref()).await?,
        Commands::Bitfield { bitfield, pieces } => decode_bitfield_flags(&bitfield, pieces)?,
    };
    println!("{output}");
    Ok(())
}

/// Loads the state file, treating a missing file as empty.
async fn read_state(config: &PieceIoConfig) -> anyhow::Result<PrioritySnapshot> {
    match load_snapshot(&config.state.path).await {
        Ok(snapshot) => Ok(snapshot),
        Err(StateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No state file at {}", config.state.path.display());
            Ok(PrioritySnapshot::new())
        }
        Err(e) => Err(e)
            .with_context(|| format!("failed to read {}", config.state.path.display())),
    }
}

async fn write_state(config: &PieceIoConfig, snapshot: &PrioritySnapshot) -> anyhow::Result<()> {
    FileSnapshotWriter::new(&config.state)
        .write(snapshot)
        .await
        .with_context(|| format!("failed to write {}", config.state.path.display()))
}

fn parse_info_hash(torrent: &str) -> anyhow::Result<InfoHash> {
    Ok(torrent.trim().to_lowercase().parse()?)
}

async fn show_state(config: &PieceIoConfig, torrent: Option<&str>) -> anyhow::Result<String> {
    let snapshot = read_state(config).await?;

    let json = match torrent {
        Some(torrent) => {
            let info_hash = parse_info_hash(torrent)?;
            let priority_map = snapshot.get(&info_hash).cloned().unwrap_or_default();
            serde_json::to_string_pretty(&priority_map)?
        }
        None => serde_json::to_string_pretty(&snapshot)?,
    };
    Ok(json)
}

async fn remove_torrent(config: &PieceIoConfig, torrent: &str) -> anyhow::Result<String> {
    let info_hash = parse_info_hash(torrent)?;
    let mut snapshot = read_state(config).await?;

    let Some(removed) = snapshot.remove(&info_hash) else {
        return Ok(format!("No priorities stored for {info_hash}"));
    };
    write_state(config, &snapshot).await?;

    Ok(format!(
        "Removed priorities of {} callers for {info_hash}",
        removed.len()
    ))
}

async fn remove_caller(
    config: &PieceIoConfig,
    torrent: &str,
    caller: &str,
) -> anyhow::Result<String> {
    let info_hash = parse_info_hash(torrent)?;
    let mut reconciler = PriorityReconciler::from_snapshot(read_state(config).await?);

    if !reconciler.priority_map(info_hash).contains_key(caller) {
        return Ok(format!("Caller {caller} has no priorities for {info_hash}"));
    }
    reconciler.update(info_hash, None, Some(vec![caller.to_string()]));
    write_state(config, &reconciler.snapshot()).await?;

    Ok(format!("Removed caller {caller} from {info_hash}"))
}

async fn effective_priorities(
    config: &PieceIoConfig,
    torrent: &str,
    pieces: usize,
    have: Option<&str>,
) -> anyhow::Result<String> {
    let info_hash = parse_info_hash(torrent)?;
    let have = match have {
        Some(bitfield) => {
            let bytes = hex::decode(bitfield.trim()).context("have bitfield is not hex")?;
            decode_bitfield(&bytes, pieces)
        }
        None => vec![false; pieces],
    };

    // Reconciling prunes the in-memory copy only; the file is left alone.
    let mut reconciler = PriorityReconciler::from_snapshot(read_state(config).await?);
    let reconciliation = reconciler.reconcile(info_hash, &have);

    let mut output = String::new();
    if reconciliation.priorities.is_empty() {
        output.push_str("No piece priorities apply; the engine default is used");
    }
    for (piece, priority) in &reconciliation.priorities {
        writeln!(output, "{piece}\t{priority}")?;
    }
    Ok(output.trim_end().to_string())
}

fn decode_bitfield_flags(bitfield: &str, pieces: usize) -> anyhow::Result<String> {
    let bytes = hex::decode(bitfield.trim()).context("bitfield is not hex")?;
    if bytes.len() * 8 < pieces {
        bail!(
            "bitfield has {} bits but {pieces} pieces were requested",
            bytes.len() * 8
        );
    }

    let flags = decode_bitfield(&bytes, pieces);
    let have = flags.iter().filter(|&&owned| owned).count();
    let rendered: String = flags
        .iter()
        .map(|&owned| if owned { '1' } else { '0' })
        .collect();

    Ok(format!("{rendered}\n{have}/{pieces} pieces"))
}
