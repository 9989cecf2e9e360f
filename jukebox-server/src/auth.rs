//! Spotify OAuth (authorization code flow)
//!
//! Holds the single upstream account's token, refreshes it transparently
//! and persists it to disk so a restart does not require a new admin login.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jukebox_common::{Error, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Spotify accounts service
pub const SPOTIFY_ACCOUNTS_URL: &str = "https://accounts.spotify.com";

/// Scopes needed to read playback and modify the shared playlist
pub const SCOPES: &[&str] = &[
    "user-read-email",
    "user-read-recently-played",
    "user-read-currently-playing",
    "playlist-modify-public",
    "playlist-modify-private",
];

/// Tokens expiring within this many seconds are refreshed before use
const EXPIRY_SKEW_SECS: i64 = 10;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client registration and endpoints
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Public server address; the callback lives at `<server_name>/spotify/callback`
    pub server_name: String,
    pub accounts_url: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            server_name: server_name.into(),
            accounts_url: SPOTIFY_ACCOUNTS_URL.to_string(),
        }
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}/spotify/callback", self.server_name.trim_end_matches('/'))
    }
}

/// Persisted token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Usable without refreshing
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - chrono::Duration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<String>) -> Token {
        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            // Refresh responses may omit the refresh token; keep the old one
            refresh_token: self.refresh_token.or(previous_refresh),
            expiry: self
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        }
    }
}

/// OAuth state for the single upstream account
pub struct OAuthService {
    config: OAuthConfig,
    http: Client,
    token: RwLock<Option<Token>>,
    token_path: Option<PathBuf>,
    state: String,
}

impl OAuthService {
    /// Create the service, restoring a persisted token if `token_path` is set
    pub fn new(config: OAuthConfig, token_path: Option<PathBuf>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        let restored = token_path.as_deref().and_then(restore_token);

        Ok(Self {
            config,
            http,
            token: RwLock::new(restored),
            token_path: token_path.filter(|p| !p.as_os_str().is_empty()),
            state: rand::random::<u64>().to_string(),
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Where to send the admin to log in
    pub fn authorize_url(&self) -> Result<String> {
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.config.accounts_url),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri().as_str()),
                ("scope", SCOPES.join(" ").as_str()),
                ("state", self.state.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("Invalid accounts URL: {}", e)))?;
        Ok(url.into())
    }

    /// Compare the callback's `state` parameter with the one we issued
    pub fn verify_state(&self, state: &str) -> bool {
        !state.is_empty() && state == self.state
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Exchange an authorization code and start using the resulting token
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let redirect_uri = self.config.redirect_uri();
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .await?;
        self.use_token(response.into_token(None)).await;
        Ok(())
    }

    /// Current access token, refreshed first if it is about to expire
    pub async fn access_token(&self) -> Result<String> {
        {
            let guard = self.token.read().await;
            match guard.as_ref() {
                None => {
                    return Err(Error::Auth("No token yet, an admin needs to log in".to_string()))
                }
                Some(token) if token.is_fresh(Utc::now()) => {
                    return Ok(token.access_token.clone())
                }
                Some(_) => {}
            }
        }

        let mut guard = self.token.write().await;
        // Another caller may have refreshed while we waited for the write lock
        let refresh_token = match guard.as_ref() {
            Some(token) if token.is_fresh(Utc::now()) => return Ok(token.access_token.clone()),
            Some(token) => token.refresh_token.clone(),
            None => None,
        };
        let refresh_token = refresh_token.ok_or_else(|| {
            Error::Auth("Token expired and no refresh token available".to_string())
        })?;

        debug!("Refreshing access token");
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .await?;
        let token = response.into_token(Some(refresh_token));
        let access = token.access_token.clone();
        *guard = Some(token.clone());
        drop(guard);

        info!("Refreshed access token");
        self.persist(&token);
        Ok(access)
    }

    /// Force a refresh on next use, e.g. after the upstream rejected the token
    pub async fn invalidate(&self) {
        if let Some(token) = self.token.write().await.as_mut() {
            token.expiry = Some(Utc::now());
        }
    }

    /// Replace the current token and persist it
    pub async fn use_token(&self, token: Token) {
        self.persist(&token);
        *self.token.write().await = Some(token);
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(format!("{}/api/token", self.config.accounts_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("Token endpoint returned {}: {}", status, body)));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Decode(format!("Failed to parse token response: {}", e)))
    }

    fn persist(&self, token: &Token) {
        let Some(path) = self.token_path.as_deref() else {
            return;
        };
        match write_token(path, token) {
            Ok(()) => info!(path = %path.display(), "Persisted token to disk"),
            Err(e) => error!(path = %path.display(), error = %e, "Writing of token file failed"),
        }
    }
}

fn restore_token(path: &Path) -> Option<Token> {
    if path.as_os_str().is_empty() {
        return None;
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Reading of token file failed");
            return None;
        }
    };
    match serde_json::from_slice::<Token>(&bytes) {
        Ok(token) => {
            info!(path = %path.display(), "Restored token");
            Some(token)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Could not restore token");
            None
        }
    }
}

/// Write the token, readable by the owner only
///
/// A new file is created with mode 0600; an existing file is narrowed to 0600
/// before any secret is written into it.
fn write_token(path: &Path, token: &Token) -> Result<()> {
    let json = serde_json::to_vec_pretty(token)?;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(&json)?;
    file.sync_all()?;
    Ok(())
}
