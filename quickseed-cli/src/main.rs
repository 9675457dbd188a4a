//! Quickseed CLI - Command-line interface
//!
//! Streams local media files through a simulated swarm so players can start
//! playback while pieces are still arriving.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use quickseed_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "quickseed")]
#[command(about = "Stream media over HTTP while its pieces are still downloading")]
pub struct Cli {
    /// Media files making up the source
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Port to bind the stream server to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Index of the file to stream (defaults to the largest video)
    #[arg(short = 'f', long = "file-index")]
    pub file_index: Option<usize>,

    /// Piece length in bytes
    #[arg(long, default_value_t = 256 * 1024)]
    pub piece_length: u64,

    /// Simulated download rate in bytes per second (0 = instant)
    #[arg(long)]
    pub rate: Option<u64>,

    /// Simulated peer count
    #[arg(long, default_value_t = 12)]
    pub peers: usize,

    /// Maximum number of concurrent streaming responses
    #[arg(long)]
    pub max_streams: Option<usize>,

    /// Answer 503 to stream requests until the file is ready to play
    #[arg(long)]
    pub require_ready: bool,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    pub log_level: CliLogLevel,

    /// Directory for the full trace log (overrides QUICKSEED_LOGS_DIR)
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::build_config(&cli)?;
    init_tracing(cli.log_level.into(), &config.logging)?;

    commands::run(cli, config).await
}
