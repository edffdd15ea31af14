//! Configuration management for repath.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::MacAddr;
use crate::types::{PathId, Role, PATH_NB};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Role of this endpoint.
    #[serde(default)]
    pub role: Role,

    /// Ethernet/IPv4/UDP envelope addressing.
    #[serde(default)]
    pub envelope: EnvelopeConfig,

    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,

    /// UDP-tunnelled NIC settings.
    #[serde(default)]
    pub nic: NicConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.envelope.validate()?;
        self.engine.validate()?;
        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("org", "repath", "repath").map_or_else(
            || PathBuf::from("repath.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration for the receiver side of the reference deployment.
    pub fn example() -> Self {
        Self {
            role: Role::Receiver,
            nic: NicConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], 9000)),
                peer: Some(SocketAddr::from(([192, 168, 200, 2], 9000))),
            },
            ..Default::default()
        }
    }

    /// The same deployment seen from the other endpoint: addresses swapped.
    pub fn mirrored(&self, role: Role) -> Self {
        Self {
            role,
            envelope: self.envelope.mirrored(),
            ..self.clone()
        }
    }
}

/// Addressing of the Ethernet/IPv4/UDP envelope around every control header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Source MAC of frames this endpoint emits.
    #[serde(default = "default_local_mac")]
    pub local_mac: MacAddr,

    /// Destination MAC (the peer).
    #[serde(default = "default_peer_mac")]
    pub peer_mac: MacAddr,

    /// Source IPv4 address.
    #[serde(default = "default_local_ip")]
    pub local_ip: Ipv4Addr,

    /// Destination IPv4 address.
    #[serde(default = "default_peer_ip")]
    pub peer_ip: Ipv4Addr,

    /// Well-known UDP source port of control traffic.
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Destination port of path 1; path `n` uses `base_port - 1 + n`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_local_mac() -> MacAddr {
    MacAddr::new([0x08, 0xc0, 0xeb, 0xbf, 0xef, 0x82])
}
fn default_peer_mac() -> MacAddr {
    MacAddr::new([0x08, 0xc0, 0xeb, 0xbf, 0xef, 0x9a])
}
fn default_local_ip() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 200, 1)
}
fn default_peer_ip() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 200, 2)
}
fn default_control_port() -> u16 {
    1234
}
fn default_base_port() -> u16 {
    5678
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            local_mac: default_local_mac(),
            peer_mac: default_peer_mac(),
            local_ip: default_local_ip(),
            peer_ip: default_peer_ip(),
            control_port: default_control_port(),
            base_port: default_base_port(),
        }
    }
}

impl EnvelopeConfig {
    /// Swap local and peer addresses.
    pub fn mirrored(&self) -> Self {
        Self {
            local_mac: self.peer_mac,
            peer_mac: self.local_mac,
            local_ip: self.peer_ip,
            peer_ip: self.local_ip,
            ..self.clone()
        }
    }

    /// Highest destination port used by any path.
    pub fn last_path_port(&self) -> u32 {
        u32::from(self.base_port) + PATH_NB as u32 - 1
    }

    fn validate(&self) -> Result<()> {
        if self.base_port == 0 || self.last_path_port() > u32::from(u16::MAX) {
            return Err(Error::InvalidConfig(format!(
                "base_port {} leaves no room for {PATH_NB} path ports",
                self.base_port
            )));
        }

        let control = u32::from(self.control_port);
        if (u32::from(self.base_port)..=self.last_path_port()).contains(&control) {
            return Err(Error::InvalidConfig(format!(
                "control_port {} collides with path ports",
                self.control_port
            )));
        }

        Ok(())
    }
}

/// Engine tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path the data plane starts on.
    #[serde(default = "default_initial_path")]
    pub initial_path: PathId,

    /// Gap between probe rounds.
    #[serde(default = "default_probe_interval", with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Time to wait for REPATH_ACK before retransmitting.
    #[serde(default = "default_repath_timeout", with = "humantime_serde")]
    pub repath_timeout: Duration,

    /// How long a received REPATH suppresses duplicates of itself.
    #[serde(default = "default_repath_guard", with = "humantime_serde")]
    pub repath_guard: Duration,

    /// Retransmissions before a negotiation is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fraction of the observed delay range at which the threshold sits.
    #[serde(default = "default_threshold_ratio")]
    pub threshold_ratio: f64,

    /// Constant added to every one-way delay to absorb sender/receiver clock offset.
    #[serde(default = "default_clock_bias", with = "humantime_serde")]
    pub clock_bias: Duration,

    /// Frames moved per burst.
    #[serde(default = "default_burst_size")]
    pub burst_size: usize,

    /// Capacity of the ingress and egress queues.
    #[serde(default = "default_ring_size")]
    pub ring_size: usize,

    /// Packet buffers available to the engine.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Granularity of timer expiry checks.
    #[serde(default = "default_timer_resolution", with = "humantime_serde")]
    pub timer_resolution: Duration,

    /// Sleep when a loop iteration found no work.
    #[serde(default = "default_idle_backoff", with = "humantime_serde")]
    pub idle_backoff: Duration,

    /// Period of the statistics log line (zero disables it).
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,
}

fn default_initial_path() -> PathId {
    PathId::FIRST
}
fn default_probe_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_repath_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_repath_guard() -> Duration {
    Duration::from_secs(2)
}
fn default_max_retries() -> u32 {
    3
}
fn default_threshold_ratio() -> f64 {
    0.7
}
fn default_clock_bias() -> Duration {
    Duration::from_secs(1)
}
fn default_burst_size() -> usize {
    32
}
fn default_ring_size() -> usize {
    1024
}
fn default_pool_size() -> usize {
    8191
}
fn default_timer_resolution() -> Duration {
    Duration::from_millis(10)
}
fn default_idle_backoff() -> Duration {
    Duration::from_millis(1)
}
fn default_stats_interval() -> Duration {
    Duration::from_secs(10)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_path: default_initial_path(),
            probe_interval: default_probe_interval(),
            repath_timeout: default_repath_timeout(),
            repath_guard: default_repath_guard(),
            max_retries: default_max_retries(),
            threshold_ratio: default_threshold_ratio(),
            clock_bias: default_clock_bias(),
            burst_size: default_burst_size(),
            ring_size: default_ring_size(),
            pool_size: default_pool_size(),
            timer_resolution: default_timer_resolution(),
            idle_backoff: default_idle_backoff(),
            stats_interval: default_stats_interval(),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if !(self.threshold_ratio > 0.0 && self.threshold_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "threshold_ratio must be in (0, 1], got {}",
                self.threshold_ratio
            )));
        }

        if self.repath_timeout.is_zero() || self.timer_resolution.is_zero() {
            return Err(Error::InvalidConfig(
                "repath_timeout and timer_resolution must be non-zero".into(),
            ));
        }

        if self.probe_interval.is_zero() {
            return Err(Error::InvalidConfig("probe_interval must be non-zero".into()));
        }

        if self.burst_size == 0 || self.ring_size < self.burst_size {
            return Err(Error::InvalidConfig(format!(
                "ring_size ({}) must hold at least one burst ({})",
                self.ring_size, self.burst_size
            )));
        }

        if self.pool_size < PATH_NB {
            return Err(Error::InvalidConfig(format!(
                "pool_size ({}) cannot hold one probe round",
                self.pool_size
            )));
        }

        Ok(())
    }
}

/// UDP-tunnelled NIC settings used by the launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicConfig {
    /// Local socket address.
    #[serde(default = "default_nic_bind")]
    pub bind: SocketAddr,

    /// Peer socket address frames are tunnelled to.
    #[serde(default)]
    pub peer: Option<SocketAddr>,
}

fn default_nic_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

impl Default for NicConfig {
    fn default() -> Self {
        Self {
            bind: default_nic_bind(),
            peer: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
