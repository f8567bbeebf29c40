//! `board`: command-line front end for the makerspace volunteer board.
//!
//! See the library crate for the task lifecycle, crediting and live views.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use makerspace_board::config::{default_dir, BoardConfig, CONFIG_FILE_NAME};
use makerspace_board::BoardError;

mod cli;
mod cmd;

use cli::Cli;
use cmd::{Board, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let stale = e
                .chain()
                .any(|cause| cause.downcast_ref::<BoardError>().is_some_and(BoardError::is_stale_view));
            if stale {
                eprintln!("Someone probably changed this task first. Check it with `board view` and try again.");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        cmd::cmd_completions(*shell);
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(|| default_dir().join(CONFIG_FILE_NAME));
    let config = BoardConfig::load(&config_path)?;
    init_tracing(config.log_filter.as_deref());

    let config_dir = config_path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let db_path = cli.db.clone().unwrap_or_else(|| config.data_file(&config_dir));

    let Cli { command, acting, .. } = cli;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let board = Board::open(&db_path, config, acting)?;
        cmd::run(command, &board).await
    })
}

/// Logs go to stderr; filter from `RUST_LOG`, then the config file, then `warn`.
fn init_tracing(config_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
