//! Centralized configuration for Quickseed.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered through the scheduler, readiness tracker and HTTP layer.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Quickseed components.
///
/// Groups related settings into logical sections. Supports environment
/// variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct QuickseedConfig {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
    pub scheduler: SchedulerConfig,
    pub readiness: ReadinessConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the stream server binds to
    pub host: String,
    /// Port the stream server binds to
    pub port: u16,
    /// Maximum number of response bodies holding a reader at once
    pub max_concurrent_streams: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            max_concurrent_streams: 32,
        }
    }
}

/// Byte delivery tuning for the range streamer.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Read buffer for full-content responses
    pub full_chunk_size: usize,
    /// Read buffer for partial-content responses
    pub range_chunk_size: usize,
    /// Maximum bytes handed to the client between flush points
    pub flush_interval: u64,
    /// Answer 503 to GET requests until the readiness tracker reports Ready
    pub require_ready: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            full_chunk_size: 128 * 1024,   // 128 KiB
            range_chunk_size: 64 * 1024,   // 64 KiB
            flush_interval: 5 * 1024 * 1024, // 5 MiB
            require_ready: false,
        }
    }
}

/// Hot window sizing for the sequential scheduler.
///
/// Window width is `min(max_window, max(min_window, piece_count / window_divisor))`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub min_window: u32,
    pub max_window: u32,
    pub window_divisor: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_window: 3,
            max_window: 10,
            window_divisor: 20,
        }
    }
}

/// Thresholds for declaring a stream watchable.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Lower bound on the number of leading pieces sampled
    pub min_sample_pieces: u32,
    /// Fraction of the file's pieces sampled
    pub sample_fraction: f64,
    /// Completion fraction that must be strictly exceeded to be ready
    pub ready_threshold: f64,
    /// Cadence of the periodic status report
    pub report_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_sample_pieces: 5,
            sample_fraction: 0.05,
            ready_threshold: 0.5,
            report_interval: Duration::from_secs(5),
        }
    }
}

/// Source and swarm settings for a streaming session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// File to stream; None selects the largest video file
    pub file_index: Option<usize>,
    /// Maximum number of peers
    pub max_peers: usize,
    /// Download rate limit in bytes per second (None = unlimited)
    pub rate_limit: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file_index: None,
            max_peers: 80,
            rate_limit: None,
        }
    }
}

/// Where the on-disk trace log of the last run is written.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory holding `quickseed-last-run.log`
    pub logs_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl QuickseedConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("QUICKSEED_HOST") {
            if !host.is_empty() {
                config.server.host = host;
            }
        }

        if let Some(port) = env_parse::<u16>("QUICKSEED_PORT") {
            config.server.port = port;
        }

        if let Some(streams) = env_parse::<usize>("QUICKSEED_MAX_STREAMS") {
            config.server.max_concurrent_streams = streams.max(1);
        }

        if let Some(require_ready) = env_parse::<bool>("QUICKSEED_REQUIRE_READY") {
            config.streaming.require_ready = require_ready;
        }

        if let Some(index) = env_parse::<usize>("QUICKSEED_FILE_INDEX") {
            config.session.file_index = Some(index);
        }

        if let Some(max_peers) = env_parse::<usize>("QUICKSEED_MAX_PEERS") {
            config.session.max_peers = max_peers;
        }

        if let Some(limit) = env_parse::<u64>("QUICKSEED_RATE_LIMIT") {
            config.session.rate_limit = (limit > 0).then_some(limit);
        }

        if let Ok(dir) = std::env::var("QUICKSEED_LOGS_DIR") {
            if !dir.trim().is_empty() {
                config.logging.logs_dir = PathBuf::from(dir);
            }
        }

        config
    }

    /// Creates a configuration suited to in-process tests.
    ///
    /// Binds an ephemeral port and uses small chunks so short fixtures still
    /// exercise multi-chunk delivery.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                port: 0,
                ..Default::default()
            },
            streaming: StreamingConfig {
                full_chunk_size: 1024,
                range_chunk_size: 512,
                flush_interval: 4096,
                require_ready: false,
            },
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = QuickseedConfig::default();

        assert_eq!(config.server.port, 8090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.streaming.full_chunk_size, 131072);
        assert_eq!(config.streaming.range_chunk_size, 65536);
        assert_eq!(config.streaming.flush_interval, 5 * 1024 * 1024);
        assert!(!config.streaming.require_ready);
        assert_eq!(config.scheduler.min_window, 3);
        assert_eq!(config.scheduler.max_window, 10);
        assert_eq!(config.readiness.min_sample_pieces, 5);
        assert_eq!(config.readiness.report_interval, Duration::from_secs(5));
        assert_eq!(config.session.max_peers, 80);
        assert_eq!(config.session.file_index, None);
        assert_eq!(config.logging.logs_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_testing_preset() {
        let config = QuickseedConfig::for_testing();
        assert_eq!(config.server.port, 0);
        assert!(config.streaming.range_chunk_size < config.streaming.full_chunk_size);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("QUICKSEED_PORT", "9100");
            std::env::set_var("QUICKSEED_MAX_STREAMS", "4");
            std::env::set_var("QUICKSEED_REQUIRE_READY", "true");
            std::env::set_var("QUICKSEED_FILE_INDEX", "2");
            std::env::set_var("QUICKSEED_RATE_LIMIT", "0");
            std::env::set_var("QUICKSEED_LOGS_DIR", "/var/log/quickseed");
        }

        let config = QuickseedConfig::from_env();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.max_concurrent_streams, 4);
        assert!(config.streaming.require_ready);
        assert_eq!(config.session.file_index, Some(2));
        assert_eq!(config.session.rate_limit, None);
        assert_eq!(config.logging.logs_dir, PathBuf::from("/var/log/quickseed"));

        // Cleanup
        unsafe {
            std::env::remove_var("QUICKSEED_PORT");
            std::env::remove_var("QUICKSEED_MAX_STREAMS");
            std::env::remove_var("QUICKSEED_REQUIRE_READY");
            std::env::remove_var("QUICKSEED_FILE_INDEX");
            std::env::remove_var("QUICKSEED_RATE_LIMIT");
            std::env::remove_var("QUICKSEED_LOGS_DIR");
        }
    }
}
