//! Centralized configuration for StreamFlow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::IpAddr;
use std::time::Duration;

/// Central configuration for all StreamFlow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct StreamflowConfig {
    pub transfer: TransferConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

/// Transfer lifecycle configuration.
///
/// Controls how long a swarm may take to deliver metadata and when idle
/// transfers are reclaimed.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bounded wait for the swarm to report the file list
    pub metadata_timeout: Duration,
    /// A transfer with no client activity for this long is evicted
    pub idle_threshold: Duration,
    /// How often the idle sweep runs
    pub sweep_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(20),
            idle_threshold: Duration::from_secs(30 * 60), // 30 minutes
            sweep_interval: Duration::from_secs(10 * 60), // 10 minutes
        }
    }
}

/// Piece scheduling configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bytes ahead of the playback offset raised to the highest priority
    pub critical_window_bytes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            critical_window_bytes: 20 * 1024 * 1024, // 20 MiB
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: IpAddr,
    /// Port to bind
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3001,
        }
    }
}

/// Simulated swarm configuration for offline development.
///
/// The simulated swarm serves files from a local directory as if they were
/// arriving from peers.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Piece length used when slicing local files into pieces
    pub piece_length: u32,
    /// Simulated aggregate download speed in bytes per second
    pub download_rate: u64,
    /// Delay before the swarm reports metadata
    pub metadata_delay: Duration,
    /// Number of peers reported in stats
    pub peer_count: u32,
    /// Interval between simulated download ticks
    pub tick_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            piece_length: 256 * 1024,     // 256 KiB
            download_rate: 4 * 1_048_576, // 4 MiB/s
            metadata_delay: Duration::from_millis(500),
            peer_count: 8,
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            piece_length: 16 * 1024,
            download_rate: 64 * 1_048_576,
            metadata_delay: Duration::ZERO,
            peer_count: 1,
            tick_interval: Duration::from_millis(5),
        }
    }

    /// Bytes transferred per download tick. A zero rate models a stalled
    /// swarm; any other rate moves at least one byte per tick.
    pub fn bytes_per_tick(&self) -> u64 {
        if self.download_rate == 0 {
            return 0;
        }
        let per_tick = self.download_rate as u128 * self.tick_interval.as_millis() / 1_000;
        (per_tick as u64).max(1)
    }
}

impl StreamflowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Durations are given in seconds.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seconds) = env_parse::<u64>("STREAMFLOW_METADATA_TIMEOUT") {
            config.transfer.metadata_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("STREAMFLOW_IDLE_THRESHOLD") {
            config.transfer.idle_threshold = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("STREAMFLOW_SWEEP_INTERVAL") {
            config.transfer.sweep_interval = Duration::from_secs(seconds.max(1));
        }

        if let Some(bytes) = env_parse::<u64>("STREAMFLOW_CRITICAL_WINDOW_BYTES") {
            config.scheduler.critical_window_bytes = bytes;
        }

        if let Some(host) = env_parse::<IpAddr>("STREAMFLOW_HOST") {
            config.server.host = host;
        }

        if let Some(port) = env_parse::<u16>("STREAMFLOW_PORT") {
            config.server.port = port;
        }

        if let Some(rate) = env_parse::<u64>("STREAMFLOW_SIM_DOWNLOAD_RATE") {
            config.simulation.download_rate = rate;
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            transfer: TransferConfig {
                metadata_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                critical_window_bytes: 64 * 1024,
            },
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {key}={value}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = StreamflowConfig::default();

        assert_eq!(config.transfer.metadata_timeout, Duration::from_secs(20));
        assert_eq!(config.transfer.idle_threshold, Duration::from_secs(1800));
        assert_eq!(config.transfer.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.scheduler.critical_window_bytes, 20 * 1024 * 1024);
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.simulation.piece_length, 262_144);
    }

    #[test]
    fn test_testing_preset_is_fast() {
        let config = StreamflowConfig::for_testing();

        assert!(config.transfer.metadata_timeout < Duration::from_secs(20));
        assert_eq!(config.simulation.metadata_delay, Duration::ZERO);
        assert!(config.scheduler.critical_window_bytes < 20 * 1024 * 1024);
    }

    #[test]
    fn test_bytes_per_tick() {
        let simulation = SimulationConfig {
            download_rate: 1_000,
            tick_interval: Duration::from_millis(100),
            ..SimulationConfig::default()
        };
        assert_eq!(simulation.bytes_per_tick(), 100);

        let stalled = SimulationConfig {
            download_rate: 0,
            ..SimulationConfig::default()
        };
        assert_eq!(stalled.bytes_per_tick(), 0);
    }
}
