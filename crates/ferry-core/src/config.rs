use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Highest value accepted for `max_concurrent_downloads`.
pub const MAX_CONCURRENT_LIMIT: usize = 10;

/// Swarm backend settings (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Transmission RPC endpoint, e.g. `http://127.0.0.1:9091/transmission/rpc`.
    pub rpc_url: String,
    /// How often the backend polls torrent statistics, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Global configuration loaded from `~/.config/ferry/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FerryConfig {
    /// Maximum number of HTTP transfers running at once (clamped to 1..=10).
    pub max_concurrent_downloads: usize,
    /// Directory new HTTP downloads are written into.
    pub default_download_directory: PathBuf,
    /// Directory new torrents are written into.
    pub torrent_download_directory: PathBuf,
    /// Keep finished torrents seeding instead of removing them from the swarm.
    #[serde(default)]
    pub torrent_seeding_enabled: bool,
    /// Abort an HTTP transfer after this many seconds without payload bytes (0 = never).
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// Optional swarm backend; without it torrent tasks fail when started.
    #[serde(default)]
    pub swarm: Option<SwarmConfig>,
}

fn default_stall_timeout_secs() -> u64 {
    60
}

impl Default for FerryConfig {
    fn default() -> Self {
        let downloads = default_download_dir();
        Self {
            max_concurrent_downloads: 3,
            torrent_download_directory: downloads.clone(),
            default_download_directory: downloads,
            torrent_seeding_enabled: false,
            stall_timeout_secs: default_stall_timeout_secs(),
            swarm: None,
        }
    }
}

impl FerryConfig {
    /// Concurrency limit after clamping into the accepted range.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent_downloads.clamp(1, MAX_CONCURRENT_LIMIT)
    }

    /// Stall timeout for HTTP transfers, `None` when disabled.
    pub fn stall_timeout(&self) -> Option<Duration> {
        match self.stall_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// `$HOME/Downloads`, or the current directory when `HOME` is unset.
pub fn default_download_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("Downloads"),
        None => PathBuf::from("."),
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ferry")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Directory holding the task snapshots (`downloads.json`, `torrents.json`).
pub fn data_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ferry")?;
    let dir = xdg_dirs.get_data_home();
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Directory for runtime state: the log file and the control socket.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ferry")?;
    let dir = xdg_dirs.get_state_home();
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FerryConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FerryConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FerryConfig = toml::from_str(&data)?;
    Ok(cfg)
}
