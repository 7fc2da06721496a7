use crate::conntrack::{Timeouts, TrackerSettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn empty_path_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<PathBuf>::deserialize(deserializer)?;
    Ok(opt.and_then(|path| {
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }))
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {}", err),
            ConfigError::Parse(err) => write!(f, "config parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
    pub stats: StatsConfig,
    pub table: TableConfig,
    pub tracking: TrackingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: Option<String>,
    /// Read frames from a pcap file instead of a live interface.
    #[serde(deserialize_with = "empty_path_none")]
    pub read_file: Option<PathBuf>,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub timeout_ms: i32,
    pub filter: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: None,
            read_file: None,
            promiscuous: true,
            snaplen: 65535,
            timeout_ms: 100,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many frames (0 = unlimited).
    pub count: u64,
    /// Worker shards (0 = pick from the CPU count).
    pub workers: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write the final connection table here as JSON.
    #[serde(deserialize_with = "empty_path_none")]
    pub export_json: Option<PathBuf>,
    /// Suppress per-rejection lines.
    pub quiet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            enabled: false,
            interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Records per worker before the least recently seen are evicted
    /// (0 = unbounded).
    pub max_conns: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig { max_conns: 65_536 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub liberal: bool,
    pub loose: u32,
    pub max_retrans: u32,
    pub verify_checksum: bool,
    pub timeouts: TimeoutConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            liberal: false,
            loose: 3,
            max_retrans: 3,
            verify_checksum: true,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl TrackingConfig {
    pub fn to_settings(&self) -> TrackerSettings {
        TrackerSettings {
            liberal: self.liberal,
            loose: self.loose,
            timeouts: self.timeouts.to_timeouts(self.max_retrans),
        }
    }
}

/// Per-status timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub syn_sent: u64,
    pub syn_recv: u64,
    pub established: u64,
    pub fin_wait: u64,
    pub close_wait: u64,
    pub last_ack: u64,
    pub time_wait: u64,
    pub close: u64,
    pub max_retrans: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let t = Timeouts::default();
        TimeoutConfig {
            syn_sent: t.syn_sent.as_secs(),
            syn_recv: t.syn_recv.as_secs(),
            established: t.established.as_secs(),
            fin_wait: t.fin_wait.as_secs(),
            close_wait: t.close_wait.as_secs(),
            last_ack: t.last_ack.as_secs(),
            time_wait: t.time_wait.as_secs(),
            close: t.close.as_secs(),
            max_retrans: t.max_retrans_timeout.as_secs(),
        }
    }
}

impl TimeoutConfig {
    fn to_timeouts(&self, max_retrans: u32) -> Timeouts {
        Timeouts {
            syn_sent: Duration::from_secs(self.syn_sent),
            syn_recv: Duration::from_secs(self.syn_recv),
            established: Duration::from_secs(self.established),
            fin_wait: Duration::from_secs(self.fin_wait),
            close_wait: Duration::from_secs(self.close_wait),
            last_ack: Duration::from_secs(self.last_ack),
            time_wait: Duration::from_secs(self.time_wait),
            close: Duration::from_secs(self.close),
            max_retrans_timeout: Duration::from_secs(self.max_retrans),
            max_retrans,
        }
    }
}
