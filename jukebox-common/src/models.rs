//! Upstream data models
//!
//! Subset of the Spotify Web API payloads used by Jukebox. Fields the
//! upstream may omit or null out are defaulted so that a partial payload
//! (e.g. an episode or an advert) still decodes.

use serde::{Deserialize, Serialize};

/// Playback snapshot from `GET /me/player/currently-playing`
///
/// A new value is decoded on every poll; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    /// Unix timestamp (ms) of the last playback state change
    #[serde(rename = "timestamp", default)]
    pub last_change: u64,

    /// Position inside the current item (ms)
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress_ms: u64,

    #[serde(rename = "currently_playing_type", default)]
    pub kind: PlayingType,

    #[serde(rename = "is_playing", default)]
    pub playing: bool,

    /// Currently playing item; null for adverts and some episodes
    #[serde(rename = "item", default)]
    pub song: Option<Song>,
}

impl NowPlaying {
    /// Names of all artists joined for display
    pub fn artist_line(&self) -> String {
        self.song
            .as_ref()
            .map(|s| s.artist_line())
            .unwrap_or_default()
    }

    /// Progress as a fraction of the song duration, clamped to 0.0-1.0
    pub fn progress_fraction(&self) -> f64 {
        match &self.song {
            Some(song) if song.duration_ms > 0 => {
                (self.progress_ms as f64 / song.duration_ms as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

/// Discriminator for the currently playing item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayingType {
    Track,
    Episode,
    Ad,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Track descriptor shared by several endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub album: Album,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Song {
    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverImage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub height: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub width: u32,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Album {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "album_type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(rename = "images", default)]
    pub cover_images: Vec<CoverImage>,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub release_date_precision: String,
}

impl Album {
    /// Smallest cover that is at least `min_width` wide, falling back to the largest one
    pub fn cover_for_width(&self, min_width: u32) -> Option<&CoverImage> {
        self.cover_images
            .iter()
            .filter(|c| c.width >= min_width)
            .min_by_key(|c| c.width)
            .or_else(|| self.cover_images.iter().max_by_key(|c| c.width))
    }
}

/// Response of `GET /search?type=track`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub tracks: SearchResultTracks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResultTracks {
    #[serde(rename = "items", default)]
    pub songs: Vec<Song>,
}

/// Response of `GET /me`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(rename = "display_name", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
}

/// Body of `POST /playlists/{id}/tracks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddTracksToPlaylistReq {
    pub uris: Vec<String>,
    pub position: u32,
}

impl AddTracksToPlaylistReq {
    /// Prepend a single track
    pub fn prepend(uri: impl Into<String>) -> Self {
        Self {
            uris: vec![uri.into()],
            position: 0,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
