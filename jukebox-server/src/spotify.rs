//! Spotify Web API client
//!
//! Implements only the calls Jukebox needs. Every request carries the bearer
//! token of the single upstream account, obtained from [`OAuthService`].
//!
//! # API Reference
//! - Base: https://api.spotify.com/v1
//! - `GET /me/player/currently-playing` answers 204 when nothing is playing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jukebox_common::models::{AddTracksToPlaylistReq, SearchResult, User};
use jukebox_common::{Error, NowPlaying, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::OAuthService;
use crate::realtime::NowPlayingSource;

/// Spotify Web API base URL
pub const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Catalog and playlist operations used by the HTTP handlers
#[async_trait]
pub trait MusicApi: Send + Sync {
    async fn now_playing(&self) -> Result<Option<NowPlaying>>;
    async fn user(&self) -> Result<User>;
    async fn search(&self, query: &str, market: &str, limit: u32) -> Result<SearchResult>;
    async fn add_to_playlist(&self, playlist_id: &str, song_uri: &str) -> Result<()>;
}

pub struct SpotifyClient {
    http: Client,
    auth: Arc<OAuthService>,
    base: String,
}

impl SpotifyClient {
    pub fn new(auth: Arc<OAuthService>) -> Result<Self> {
        Self::with_base_url(auth, SPOTIFY_API_URL)
    }

    pub fn with_base_url(auth: Arc<OAuthService>, base: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            auth,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let request = self.http.get(self.url(path)).query(query);
        let response = self.send(request).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(format!("Failed to parse response of {}: {}", path, e)))?;
        Ok(Some(body))
    }

    async fn post<B: serde::Serialize + ?Sized>(&self, path: &str, payload: &B) -> Result<()> {
        let request = self.http.post(self.url(path)).json(payload);
        self.send(request).await?;
        Ok(())
    }

    /// Authenticate, send and map non-2xx answers to errors
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let token = self.auth.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Spotify request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            warn!("Spotify rejected the access token, forcing a refresh");
            self.auth.invalidate().await;
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MusicApi for SpotifyClient {
    async fn now_playing(&self) -> Result<Option<NowPlaying>> {
        self.get("/me/player/currently-playing", &[]).await
    }

    async fn user(&self) -> Result<User> {
        self.get("/me", &[])
            .await?
            .ok_or_else(|| Error::NotFound("No user profile returned".to_string()))
    }

    async fn search(&self, query: &str, market: &str, limit: u32) -> Result<SearchResult> {
        debug!(query = %query, market = %market, limit, "Searching Spotify");
        let params = [
            ("q", query.to_string()),
            ("type", "track".to_string()),
            ("market", market.to_string()),
            ("limit", limit.to_string()),
        ];
        Ok(self.get("/search", &params).await?.unwrap_or_default())
    }

    async fn add_to_playlist(&self, playlist_id: &str, song_uri: &str) -> Result<()> {
        let path = format!("/playlists/{}/tracks", playlist_id);
        self.post(&path, &AddTracksToPlaylistReq::prepend(song_uri)).await
    }
}

#[async_trait]
impl NowPlayingSource for SpotifyClient {
    async fn now_playing(&self) -> Result<Option<NowPlaying>> {
        MusicApi::now_playing(self).await
    }
}
