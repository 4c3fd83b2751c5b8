//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::epg::EpgOptions;
use crate::error::Result;

const APP_DIR: &str = "iptv_grid";

/// Parsing and chunking knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// Playlist lines handled between yields
    pub playlist_chunk_lines: usize,
    /// Channels counted between yields when tallying categories
    pub tally_chunk_size: usize,
    /// Channel count above which tallying is chunked
    pub tally_chunk_threshold: usize,
    /// Guide programmes parsed between yields
    pub epg_yield_every: usize,
    /// Honour the `+HHMM` suffix of guide timestamps
    pub apply_timezone_offset: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            playlist_chunk_lines: 100,
            tally_chunk_size: 200,
            tally_chunk_threshold: 1000,
            epg_yield_every: 500,
            apply_timezone_offset: true,
        }
    }
}

impl ParseConfig {
    pub fn epg_options(&self) -> EpgOptions {
        EpgOptions {
            apply_timezone_offset: self.apply_timezone_offset,
            yield_every: self.epg_yield_every,
        }
    }
}

/// HTTP settings for remote playlists and guides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub playlist_timeout_secs: u64,
    pub guide_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("iptv_grid/{}", env!("CARGO_PKG_VERSION")),
            playlist_timeout_secs: 20,
            guide_timeout_secs: 45,
            connect_timeout_secs: 30,
            max_retries: 1,
            retry_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default = "default_refresh")]
    pub refresh_interval_secs: u64,
    // Remembered sources
    #[serde(default)]
    pub last_playlist: Option<String>,
    #[serde(default)]
    pub last_guide: Option<String>,
}

fn default_refresh() -> u64 { 30 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            parse: ParseConfig::default(),
            fetch: FetchConfig::default(),
            refresh_interval_secs: default_refresh(),
            last_playlist: None,
            last_guide: None,
        }
    }
}

/// Per-user directory holding the config file and the session snapshot
pub fn config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}

impl AppConfig {
    fn config_path() -> PathBuf {
        config_dir().join("config.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Missing, unreadable or invalid files give the defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!("Could not read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
