use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Volunteer board for the makerspace.
/// Storage defaults to ~/.makerspace/board.json or a path passed via --db.
#[derive(Parser)]
#[command(name = "board", version, about = "Makerspace volunteer task board")]
pub struct Cli {
    /// Path to the JSON data file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to the TOML config file (default: ~/.makerspace/board.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Volunteer you are acting as: id, identity reference or name.
    #[arg(long = "as", global = true, env = "BOARD_VOLUNTEER")]
    pub acting: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}
