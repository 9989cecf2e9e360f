//! HTTP API
//!
//! Two routers share one [`AppContext`]: the user router serves the page,
//! now-playing views, search and song requests; the admin router only sends
//! the operator to the Spotify login.

pub mod handlers;
pub mod health;
pub mod sse;

use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::auth::OAuthService;
use crate::realtime::RealtimeService;
use crate::spotify::MusicApi;

/// Settings the handlers need at request time
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Public server address, echoed as the allowed SSE origin
    pub server_name: String,
    pub search_market: String,
    pub search_limit: u32,
    pub playlist_id: String,
}

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub realtime: RealtimeService,
    pub music: Arc<dyn MusicApi>,
    pub oauth: Arc<OAuthService>,
    pub settings: Arc<ApiSettings>,
}

/// Routes reachable by guests
pub fn build_user_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/now-playing", get(handlers::now_playing))
        .route("/now-playing-live", get(sse::now_playing_live))
        .route("/search", post(handlers::search))
        .route("/add", post(handlers::add))
        .route("/spotify/callback", get(handlers::spotify_callback))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Routes for the operator's login, bound to a separate listener
pub fn build_admin_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(handlers::login))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
