//! Jukebox server configuration
//!
//! Settings sources priority:
//! 1. Command-line arguments
//! 2. Environment variables (`JUKEBOX_*`)
//! 3. TOML configuration file
//! 4. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use jukebox_common::config::FileConfig;
use jukebox_common::time::parse_duration;

use crate::realtime::DEFAULT_DELIVERY_TIMEOUT;

const DEFAULT_SERVER_NAME: &str = "http://localhost:8080";
const DEFAULT_SERVER_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_AUTH_LISTEN: &str = "127.0.0.1:8081";
const DEFAULT_TOKEN_PATH: &str = "./token.json";
const DEFAULT_FREQUENCY: Duration = Duration::from_secs(1);
const DEFAULT_MARKET: &str = "DE";
const DEFAULT_SEARCH_LIMIT: u32 = 15;
const DEFAULT_METRICS_LISTEN: &str = "0.0.0.0:9999";

/// Command-line arguments for jukebox
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "jukebox")]
#[command(about = "Shared now-playing display and song requests for one Spotify account")]
#[command(version)]
pub struct Args {
    /// TOML config file (defaults to $JUKEBOX_CONFIG or the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Public address of the server, used for CORS and the OAuth redirect
    #[arg(long = "server.name", env = "JUKEBOX_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Listen address for the user-facing routes
    #[arg(long = "server.listen", env = "JUKEBOX_SERVER_LISTEN")]
    pub server_listen: Option<String>,

    /// Listen address for the admin's Spotify login
    #[arg(long = "auth.listen", env = "JUKEBOX_AUTH_LISTEN")]
    pub auth_listen: Option<String>,

    /// OAuth client id
    #[arg(long = "auth.client.id", env = "JUKEBOX_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long = "auth.client.secret", env = "JUKEBOX_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Where the token is persisted; empty disables persistence
    #[arg(long = "auth.token.path", env = "JUKEBOX_TOKEN_PATH")]
    pub token_path: Option<PathBuf>,

    /// Frequency of now-playing updates (e.g. 1s, 500ms)
    #[arg(
        long = "nowplaying.frequency",
        env = "JUKEBOX_NOWPLAYING_FREQUENCY",
        value_parser = parse_duration_arg
    )]
    pub frequency: Option<Duration>,

    /// How long a live viewer may stall before its stream is closed
    #[arg(
        long = "nowplaying.delivery-timeout",
        env = "JUKEBOX_DELIVERY_TIMEOUT",
        value_parser = parse_duration_arg
    )]
    pub delivery_timeout: Option<Duration>,

    /// Market that searching is limited to
    #[arg(long = "search.market", env = "JUKEBOX_SEARCH_MARKET")]
    pub search_market: Option<String>,

    /// Number of results that searching is limited to
    #[arg(long = "search.limit", env = "JUKEBOX_SEARCH_LIMIT")]
    pub search_limit: Option<u32>,

    /// ID of the playlist guests can prepend to
    #[arg(long = "playlist.id", env = "JUKEBOX_PLAYLIST_ID")]
    pub playlist_id: Option<String>,

    /// Listen address of the Prometheus endpoint; empty disables it
    #[arg(long = "metrics.listen", env = "JUKEBOX_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,

    /// Log at debug level
    #[arg(short, long, env = "JUKEBOX_VERBOSE")]
    pub verbose: bool,
}

fn parse_duration_arg(value: &str) -> Result<Duration, String> {
    let duration = parse_duration(value).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server_name: String,
    pub server_listen: String,
    pub auth_listen: String,
    pub client_id: String,
    pub client_secret: String,
    /// `None` when persistence is disabled
    pub token_path: Option<PathBuf>,
    pub frequency: Duration,
    pub delivery_timeout: Duration,
    pub search_market: String,
    pub search_limit: u32,
    pub playlist_id: String,
    /// `None` when the metrics listener is disabled
    pub metrics_listen: Option<String>,
    pub verbose: bool,
}

/// Settings that cannot be used to start the server
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// Required settings that were not provided anywhere
    #[error("missing required arguments: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value for --{name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl Config {
    /// Merge CLI/env arguments over file values and defaults
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, SettingsError> {
        let client_id = non_empty(args.client_id.or(file.auth.client_id));
        let client_secret = non_empty(args.client_secret.or(file.auth.client_secret));
        let playlist_id = non_empty(args.playlist_id.or(file.playlist.id));

        let mut missing = Vec::new();
        if client_id.is_none() {
            missing.push("auth.client.id");
        }
        if client_secret.is_none() {
            missing.push("auth.client.secret");
        }
        if playlist_id.is_none() {
            missing.push("playlist.id");
        }
        let (Some(client_id), Some(client_secret), Some(playlist_id)) =
            (client_id, client_secret, playlist_id)
        else {
            return Err(SettingsError::Missing(missing));
        };

        let frequency = args
            .frequency
            .or(file.nowplaying.frequency())
            .unwrap_or(DEFAULT_FREQUENCY);
        if frequency.is_zero() {
            return Err(SettingsError::Invalid {
                name: "nowplaying.frequency",
                reason: "must be greater than zero".to_string(),
            });
        }

        let token_path = args
            .token_path
            .or(file.auth.token_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH));

        Ok(Self {
            server_name: args
                .server_name
                .or(file.server.name)
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            server_listen: args
                .server_listen
                .or(file.server.listen)
                .unwrap_or_else(|| DEFAULT_SERVER_LISTEN.to_string()),
            auth_listen: args
                .auth_listen
                .or(file.auth.listen)
                .unwrap_or_else(|| DEFAULT_AUTH_LISTEN.to_string()),
            client_id,
            client_secret,
            token_path: (!token_path.as_os_str().is_empty()).then_some(token_path),
            frequency,
            delivery_timeout: args
                .delivery_timeout
                .or(file.nowplaying.delivery_timeout())
                .unwrap_or(DEFAULT_DELIVERY_TIMEOUT),
            search_market: args
                .search_market
                .or(file.search.market)
                .unwrap_or_else(|| DEFAULT_MARKET.to_string()),
            search_limit: args
                .search_limit
                .or(file.search.limit)
                .unwrap_or(DEFAULT_SEARCH_LIMIT),
            playlist_id,
            metrics_listen: non_empty(Some(
                args.metrics_listen
                    .or(file.metrics.listen)
                    .unwrap_or_else(|| DEFAULT_METRICS_LISTEN.to_string()),
            )),
            verbose: args.verbose || file.logging.verbose.unwrap_or(false),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_args() -> Args {
        Args {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            playlist_id: Some("playlist".to_string()),
            ..Args::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(required_args(), FileConfig::default()).unwrap();
        assert_eq!(config.server_name, DEFAULT_SERVER_NAME);
        assert_eq!(config.server_listen, DEFAULT_SERVER_LISTEN);
        assert_eq!(config.auth_listen, DEFAULT_AUTH_LISTEN);
        assert_eq!(config.token_path, Some(PathBuf::from(DEFAULT_TOKEN_PATH)));
        assert_eq!(config.frequency, Duration::from_secs(1));
        assert_eq!(config.delivery_timeout, Duration::from_millis(200));
        assert_eq!(config.search_market, "DE");
        assert_eq!(config.search_limit, 15);
        assert_eq!(config.metrics_listen.as_deref(), Some(DEFAULT_METRICS_LISTEN));
        assert!(!config.verbose);
    }

    #[test]
    fn test_missing_required_settings_are_all_reported() {
        let err = Config::resolve(Args::default(), FileConfig::default()).unwrap_err();
        assert_eq!(
            err,
            SettingsError::Missing(vec!["auth.client.id", "auth.client.secret", "playlist.id"])
        );
        assert_eq!(
            err.to_string(),
            "missing required arguments: auth.client.id, auth.client.secret, playlist.id"
        );
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let mut args = required_args();
        args.playlist_id = Some("  ".to_string());
        let err = Config::resolve(args, FileConfig::default()).unwrap_err();
        assert_eq!(err, SettingsError::Missing(vec!["playlist.id"]));
    }

    #[test]
    fn test_file_fills_gaps_and_args_override() {
        let file = FileConfig::parse(
            r#"
            [server]
            name = "https://file.example"
            listen = "0.0.0.0:9000"

            [auth]
            client_id = "file-id"
            client_secret = "file-secret"

            [nowplaying]
            frequency_ms = 2500

            [playlist]
            id = "file-playlist"

            [logging]
            verbose = true
            "#,
        )
        .unwrap();

        let args = Args {
            server_name: Some("https://cli.example".to_string()),
            ..Args::default()
        };
        let config = Config::resolve(args, file).unwrap();
        assert_eq!(config.server_name, "https://cli.example");
        assert_eq!(config.server_listen, "0.0.0.0:9000");
        assert_eq!(config.client_id, "file-id");
        assert_eq!(config.frequency, Duration::from_millis(2500));
        assert_eq!(config.playlist_id, "file-playlist");
        assert!(config.verbose);
    }

    #[test]
    fn test_empty_token_path_disables_persistence() {
        let mut args = required_args();
        args.token_path = Some(PathBuf::new());
        let config = Config::resolve(args, FileConfig::default()).unwrap();
        assert!(config.token_path.is_none());
    }

    #[test]
    fn test_metrics_listener_can_be_moved_or_disabled() {
        let file = FileConfig::parse("[metrics]\nlisten = \"127.0.0.1:9100\"\n").unwrap();
        let config = Config::resolve(required_args(), file).unwrap();
        assert_eq!(config.metrics_listen.as_deref(), Some("127.0.0.1:9100"));

        let mut args = required_args();
        args.metrics_listen = Some(String::new());
        let file = FileConfig::parse("[metrics]\nlisten = \"127.0.0.1:9100\"\n").unwrap();
        let config = Config::resolve(args, file).unwrap();
        assert!(config.metrics_listen.is_none());
    }

    #[test]
    fn test_parse_command_line() {
        let args = Args::try_parse_from([
            "jukebox",
            "--auth.client.id",
            "id",
            "--auth.client.secret",
            "secret",
            "--playlist.id",
            "pl",
            "--nowplaying.frequency",
            "750ms",
            "--search.limit",
            "5",
            "-v",
        ])
        .unwrap();
        assert_eq!(args.frequency, Some(Duration::from_millis(750)));
        assert_eq!(args.search_limit, Some(5));
        assert!(args.verbose);
    }

    #[test]
    fn test_rejects_zero_frequency_on_command_line() {
        for value in ["0s", "0", "0ms"] {
            let result = Args::try_parse_from(["jukebox", "--nowplaying.frequency", value]);
            assert!(result.is_err(), "{} should be rejected", value);
        }
    }

    #[test]
    fn test_rejects_zero_frequency_from_file() {
        let file = FileConfig::parse("[nowplaying]\nfrequency_ms = 0\n").unwrap();
        let err = Config::resolve(required_args(), file).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid { name: "nowplaying.frequency", .. }
        ));
    }

    #[test]
    fn test_rejects_bad_duration() {
        let result = Args::try_parse_from(["jukebox", "--nowplaying.frequency", "soon"]);
        assert!(result.is_err());
    }
}
