//! Jukebox server library
//!
//! Shared now-playing display and song requests for a single Spotify
//! account. Guests see what is playing in real time and can prepend songs
//! to a shared playlist; the operator logs in once on the admin listener.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod realtime;
pub mod server;
pub mod spotify;
pub mod ui;

pub use config::{Args, Config};
pub use realtime::{NowPlayingSource, RealtimeService};
pub use spotify::{MusicApi, SpotifyClient};
