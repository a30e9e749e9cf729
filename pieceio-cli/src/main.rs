//! PieceIO CLI - offline maintenance of PieceIO state
//!
//! Inspects and edits the persisted priority maps while the service is not
//! running, and decodes piece bitfields reported by the status fields.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pieceio_core::config::PieceIoConfig;
use pieceio_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "pieceio")]
#[command(about = "Inspect and maintain PieceIO piece priority state")]
#[command(version)]
struct Cli {
    /// State file to operate on (defaults to PIECEIO_STATE_PATH or ./pieceio-state.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Warn, global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run debug log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("failed to initialize logging")?;

    let mut config = PieceIoConfig::from_env();
    if let Some(state) = cli.state {
        config.state.path = state;
    }

    commands::handle_command(cli.command, &config).await
}
