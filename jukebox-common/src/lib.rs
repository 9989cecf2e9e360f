//! # Jukebox Common Library
//!
//! Shared code for the Jukebox crates including:
//! - Upstream (Spotify Web API) data models
//! - Common error type
//! - Configuration file loading
//! - Time formatting helpers

pub mod config;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::NowPlaying;
