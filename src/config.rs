use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{OptionExt, WrapErr};
use serde::{Deserialize, Serialize};

use crate::soundcloud_rs::auth::SOUNDCLOUD_AUTH_BASE;
use crate::soundcloud_rs::client::SOUNDCLOUD_API_BASE;

const APP_DIR: &str = "playlist-mirror";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory the playlists are mirrored into
    pub directory: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    #[serde(default = "default_tracks_concurrency")]
    pub tracks_concurrency: usize,
    #[serde(default = "default_playlist_concurrency")]
    pub playlist_concurrency: usize,
    #[serde(default = "default_true")]
    pub sync_if_missing_in_cache: bool,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Playlist id -> title used when the remote title is missing
    #[serde(default)]
    pub playlists: BTreeMap<String, String>,
}

fn default_redirect_uri() -> String {
    "http://localhost:8080/callback".to_string()
}

fn default_api_base() -> String {
    SOUNDCLOUD_API_BASE.to_string()
}

fn default_auth_base() -> String {
    SOUNDCLOUD_AUTH_BASE.to_string()
}

fn default_tracks_concurrency() -> usize {
    10
}

fn default_playlist_concurrency() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_check_interval_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: "~/Music/SoundCloud".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            api_base: default_api_base(),
            auth_base: default_auth_base(),
            tracks_concurrency: default_tracks_concurrency(),
            playlist_concurrency: default_playlist_concurrency(),
            sync_if_missing_in_cache: default_true(),
            requests_per_second: default_requests_per_second(),
            check_interval_secs: default_check_interval_secs(),
            otlp_endpoint: None,
            playlists: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Default location of the config file
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIR).join("config.toml"))
    }

    /// Where the OAuth tokens are stored, next to the config file
    pub fn token_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIR).join("tokens.json"))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or_eyre("No config directory found")?;
        Self::from_file(&config_path)
    }

    /// Write the default config to `path`, unless a file already exists there.
    /// Returns whether a file was written.
    pub fn create_default_at(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(&Config::default())?;
        std::fs::write(path, contents)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(true)
    }

    /// Get expanded directory path
    pub fn directory_path(&self) -> PathBuf {
        expand_path(&self.directory)
    }
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
