//! CLI for the Ferry download manager.

mod commands;
pub mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ferry_core::config;
use ferry_core::TaskId;
use std::path::PathBuf;

use commands::{run_daemon, run_status, submit};
use control_socket::Request;

/// Top-level CLI for the Ferry download manager.
#[derive(Debug, Parser)]
#[command(name = "ferry")]
#[command(about = "Ferry: HTTP/FTP and torrent download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the download daemon until interrupted.
    Run,

    /// Queue an HTTP, HTTPS, or FTP download.
    Add {
        /// URL to download.
        url: String,
    },

    /// Add a torrent from a magnet URI.
    Magnet {
        /// `magnet:?xt=urn:btih:...`
        uri: String,
    },

    /// Add a torrent from a .torrent file.
    Torrent {
        /// Path to the .torrent file.
        path: PathBuf,
    },

    /// Pause a running task.
    Pause {
        /// Task identifier (see `ferry status`).
        id: String,
    },

    /// Resume a paused or failed task.
    Resume {
        /// Task identifier.
        id: String,
    },

    /// Cancel a task. Unfinished data is deleted.
    Cancel {
        /// Task identifier.
        id: String,
    },

    /// Show all tasks, newest first.
    Status,

    /// Set how many HTTP downloads may run at once.
    Max {
        #[arg(value_parser = clap::value_parser!(u64).range(1..=10))]
        count: u64,
    },

    /// Keep finished torrents seeding.
    Seeding {
        #[arg(value_enum)]
        state: Toggle,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run => run_daemon(cfg).await?,
            CliCommand::Status => run_status().await?,
            other => submit(other.into_request()?).await?,
        }

        Ok(())
    }

    /// The control-socket request for a client command. `Run` and `Status` have none.
    fn into_request(self) -> Result<Request> {
        Ok(match self {
            CliCommand::Add { url } => Request::Enqueue(url),
            CliCommand::Magnet { uri } => Request::Magnet(uri),
            CliCommand::Torrent { path } => {
                // The daemon resolves paths against its own working directory.
                let path = if path.is_absolute() {
                    path
                } else {
                    std::env::current_dir()?.join(path)
                };
                Request::File(path)
            }
            CliCommand::Pause { id } => Request::Pause(TaskId::from(id)),
            CliCommand::Resume { id } => Request::Resume(TaskId::from(id)),
            CliCommand::Cancel { id } => Request::Cancel(TaskId::from(id)),
            CliCommand::Max { count } => Request::Max(count as usize),
            CliCommand::Seeding { state } => Request::Seeding(state == Toggle::On),
            CliCommand::Run | CliCommand::Status => {
                anyhow::bail!("command has no control request")
            }
        })
    }
}

#[cfg(test)]
mod tests;
