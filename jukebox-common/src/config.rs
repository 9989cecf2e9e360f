//! Configuration file loading and resolution
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `<user config dir>/jukebox/config.toml` if it exists
//! 4. No file (all values come from CLI/env/built-in defaults)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "JUKEBOX_CONFIG";

/// Values that may be provided by a TOML config file
///
/// Every field is optional; command-line flags and environment variables
/// take precedence over anything set here.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub nowplaying: NowPlayingSection,
    pub search: SearchSection,
    pub playlist: PlaylistSection,
    pub logging: LoggingSection,
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// Public address of the server, used for CORS and the OAuth redirect
    pub name: Option<String>,
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSection {
    pub listen: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct NowPlayingSection {
    /// Poll frequency in milliseconds
    pub frequency_ms: Option<u64>,
    /// Per-subscriber delivery timeout in milliseconds
    pub delivery_timeout_ms: Option<u64>,
}

impl NowPlayingSection {
    pub fn frequency(&self) -> Option<Duration> {
        self.frequency_ms.map(Duration::from_millis)
    }

    pub fn delivery_timeout(&self) -> Option<Duration> {
        self.delivery_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSection {
    pub market: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaylistSection {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsSection {
    /// Listen address of the Prometheus endpoint; empty disables it
    pub listen: Option<String>,
}

impl FileConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Locate the config file, if any
///
/// An explicitly named file (CLI or environment) that does not exist is an
/// error; the implicit user config location is only used when present.
pub fn resolve_config_file(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return explicit(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(path) = default_config_path() {
        if path.exists() {
            debug!(path = %path.display(), "Using config file from user config directory");
            return Ok(Some(path));
        }
    }

    debug!("No config file, using command line, environment and defaults");
    Ok(None)
}

fn explicit(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        debug!(path = %path.display(), "Using config file");
        Ok(Some(path))
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

/// `<user config dir>/jukebox/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("jukebox").join("config.toml"))
}
