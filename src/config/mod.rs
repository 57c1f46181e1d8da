//! Configuration management for chapterline.
//!
//! Configuration is read from `~/.config/chapterline/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetcher::parallel::DEFAULT_WORKERS;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub reader: ReaderConfig,
    pub downloads: DownloadsConfig,
}

/// Remote source access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,

    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,

    /// Pages of one chapter resolved and downloaded at the same time (default: 4)
    pub resolve_concurrency: usize,

    /// Pages queued behind the one being displayed (default: 4)
    pub preload_ahead: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("chapterline/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            resolve_concurrency: DEFAULT_WORKERS,
            preload_ahead: 4,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Page list and image cache on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (default: `<cache dir>/chapterline`)
    pub dir: Option<PathBuf>,

    /// Upper bound for cached images in megabytes (default: 300)
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_size_mb: 300,
        }
    }
}

impl CacheConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

/// Chapter transition behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Distance in pages from a chapter edge that triggers a neighbor preload (default: 2)
    pub preload_threshold: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            preload_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    /// Root of downloaded chapters (default: `<data dir>/chapterline/downloads`)
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/chapterline/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("chapterline").join("config.toml"))
    }

    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache.dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::cache_dir()
                .map(|d| d.join("chapterline"))
                .ok_or(ConfigError::NoConfigDir),
        }
    }

    pub fn downloads_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.downloads.dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("chapterline").join("downloads"))
                .ok_or(ConfigError::NoConfigDir),
        }
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        r##"# chapterline configuration

[http]
# Request timeout in seconds
timeout_secs = 30

# Pages of one chapter resolved at the same time
resolve_concurrency = 4

# Pages fetched ahead of the one on screen
preload_ahead = 4

[cache]
# Directory for cached page lists and images (defaults to the user cache dir)
# dir = "/tmp/chapterline"

# Upper bound for cached images, in megabytes
max_size_mb = 300

[reader]
# Preload a neighbor chapter when this many pages from the chapter edge
preload_threshold = 2

[downloads]
# Root of downloaded chapters (defaults to the user data dir)
# dir = "/srv/manga/downloads"
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl From<ConfigError> for crate::app::ReaderError {
    fn from(e: ConfigError) -> Self {
        crate::app::ReaderError::Config(e.to_string())
    }
}
