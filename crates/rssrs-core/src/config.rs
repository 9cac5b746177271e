use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cover: CoverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Items requested per page when the caller does not pass a limit
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Scheduler tick in seconds (0 = disabled)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Refresh period in minutes assigned to newly subscribed feeds
    #[serde(default = "default_feed_interval")]
    pub default_feed_interval_mins: u32,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Proxy for feed fetching: "system", "none", or a proxy URL
    /// (e.g. "http://127.0.0.1:7890" or "socks5://127.0.0.1:1080")
    #[serde(default = "default_proxy")]
    pub proxy: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            refresh_interval_secs: default_refresh_interval(),
            default_feed_interval_mins: default_feed_interval(),
            request_timeout_secs: default_timeout(),
            proxy: default_proxy(),
        }
    }
}

/// Rules for picking a cover image out of an item description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverConfig {
    /// Image hosts that never produce a cover
    #[serde(default = "default_blocked_hosts")]
    pub blocked_hosts: Vec<String>,
    /// Regular expressions matched against the image source
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            blocked_hosts: default_blocked_hosts(),
            blocked_patterns: default_blocked_patterns(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rssrs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_feed_interval() -> u32 {
    10
}

fn default_timeout() -> u64 {
    30
}

fn default_proxy() -> String {
    "system".to_string()
}

fn default_blocked_hosts() -> Vec<String> {
    vec!["m.av28.tv".to_string()]
}

fn default_blocked_patterns() -> Vec<String> {
    vec![
        r"(?i)\b1x1\b".to_string(),
        r"(?i)(pixel|tracking|spacer)\.(gif|png)".to_string(),
        r"(?i)/(ads?|banners?)/".to_string(),
    ]
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file or return defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self) -> crate::Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the configuration file path
    /// Always uses ~/.config/rssrs/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("rssrs")
            .join("config.toml")
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("rssrs.db")
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("rssrs.sock")
    }

    /// Get the daemon PID file path
    pub fn pid_path(&self) -> PathBuf {
        self.data_dir().join("daemon.pid")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }
}
