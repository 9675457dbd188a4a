//! Streaming command implementation

use std::sync::Arc;

use quickseed_core::streaming::{SessionController, SessionError};
use quickseed_core::{QuickseedConfig, QuickseedError};
use quickseed_sim::{SimConfig, SimulatedSwarm};
use quickseed_web::StreamServer;
use tracing::{error, info, warn};

use crate::Cli;

/// Applies command-line flags over environment configuration.
///
/// # Errors
/// - `QuickseedError::Configuration` - A flag value cannot be used
pub fn build_config(cli: &Cli) -> quickseed_core::Result<QuickseedConfig> {
    if cli.piece_length == 0 {
        return Err(QuickseedError::Configuration {
            reason: "piece length must be at least one byte".to_string(),
        });
    }

    let mut config = QuickseedConfig::from_env();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(index) = cli.file_index {
        config.session.file_index = Some(index);
    }
    if let Some(streams) = cli.max_streams {
        config.server.max_concurrent_streams = streams.max(1);
    }
    if cli.require_ready {
        config.streaming.require_ready = true;
    }
    if let Some(rate) = cli.rate {
        config.session.rate_limit = (rate > 0).then_some(rate);
    }
    if let Some(dir) = &cli.logs_dir {
        config.logging.logs_dir = dir.clone();
    }
    Ok(config)
}

fn sim_config(cli: &Cli, config: &QuickseedConfig) -> SimConfig {
    let defaults = SimConfig::default();
    let download_rate = match cli.rate {
        Some(rate) => rate,
        None => config.session.rate_limit.unwrap_or(defaults.download_rate),
    };
    SimConfig {
        piece_length: cli.piece_length,
        download_rate,
        peers: cli.peers.min(config.session.max_peers),
        seeders: defaults.seeders.min(cli.peers),
        ..defaults
    }
}

/// Runs the swarm, session and server until Ctrl-C.
///
/// # Errors
/// - Source files cannot be read or contain no video
/// - The server address cannot be bound
pub async fn run(cli: Cli, config: QuickseedConfig) -> anyhow::Result<()> {
    let swarm = SimulatedSwarm::from_paths(&cli.paths, sim_config(&cli, &config)).await;

    let session = Arc::new(SessionController::new(Arc::new(swarm.clone()), &config));
    let file = session
        .start(config.session.file_index)
        .await
        .map_err(start_failure)?;
    info!(
        "Streaming {} ({:.2} MB, {} pieces)",
        file.path,
        file.length as f64 / 1_048_576.0,
        file.piece_count
    );

    let downloader = swarm.spawn_downloader();
    let report_interval = config.readiness.report_interval;
    let server = StreamServer::bind(config, session.clone()).await?;
    info!("Stream URL: {}", server.stream_url());

    let reporter = tokio::spawn(report_status(session, report_interval));

    let shutdown_swarm = swarm.clone();
    server
        .serve(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            shutdown_swarm.shutdown();
        })
        .await?;

    reporter.abort();
    downloader.abort();
    Ok(())
}

/// Logs why the session could not start, in terms the user can act on.
fn start_failure(err: SessionError) -> QuickseedError {
    let err = QuickseedError::from(err);
    if err.is_user_error() {
        error!("{}", err.user_message());
    } else {
        error!("{} ({})", err.user_message(), err);
    }
    err
}

async fn report_status(session: Arc<SessionController>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let stats = session.stats();
        info!(
            "Progress {:.1}% | {:.2} MB/s | peers {} ({} seeders) | {:?} ({}/{} sample pieces)",
            stats.progress * 100.0,
            stats.download_speed / 1_048_576.0,
            stats.peers,
            stats.seeders,
            stats.readiness.state,
            stats.readiness.completed_pieces,
            stats.readiness.sample_pieces
        );
    }
}
