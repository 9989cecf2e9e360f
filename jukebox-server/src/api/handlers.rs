//! Request handlers for the page, search and song requests

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use jukebox_common::Error;
use serde::Deserialize;
use tracing::{info, warn};

use super::AppContext;
use crate::error::ApiError;
use crate::ui;

/// GET / - page shell
pub async fn index() -> Html<String> {
    Html(ui::index_page())
}

/// GET /now-playing - initial render before the live stream takes over
///
/// Upstream failures render the idle widget rather than an error page.
pub async fn now_playing(State(ctx): State<AppContext>) -> Html<String> {
    match ctx.music.now_playing().await {
        Ok(now_playing) => Html(ui::now_playing_section(now_playing.as_ref())),
        Err(e) => {
            warn!(error = %e, "Fetching now playing failed");
            Html(ui::now_playing_section(None))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchForm {
    #[serde(default)]
    pub search: String,
}

/// POST /search
pub async fn search(
    State(ctx): State<AppContext>,
    Form(form): Form<SearchForm>,
) -> Result<Html<String>, ApiError> {
    let query = form.search.trim();
    if query.is_empty() {
        return Ok(Html(String::new()));
    }

    let settings = &ctx.settings;
    let result = ctx
        .music
        .search(query, &settings.search_market, settings.search_limit)
        .await?;
    Ok(Html(ui::search_results(&result)))
}

#[derive(Debug, Deserialize)]
pub struct AddForm {
    #[serde(default)]
    pub song: String,
}

/// POST /add - prepend a song to the shared playlist
pub async fn add(
    State(ctx): State<AppContext>,
    Form(form): Form<AddForm>,
) -> Result<Html<String>, ApiError> {
    let song = form.song.trim();
    if song.is_empty() {
        return Err(Error::InvalidInput("Missing song".to_string()).into());
    }

    ctx.music
        .add_to_playlist(&ctx.settings.playlist_id, song)
        .await?;
    info!(song = %song, "Song added to playlist");
    Ok(Html(ui::disabled_button()))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code: String,
}

/// GET /spotify/callback - finish the admin login
pub async fn spotify_callback(
    State(ctx): State<AppContext>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    if !ctx.oauth.verify_state(&query.state) {
        warn!("Login callback with mismatching state");
        return Err(ApiError::InvalidState);
    }

    ctx.oauth.exchange_code(&query.code).await.map_err(|e| match e {
        Error::Auth(_) => e,
        other => Error::Auth(format!("Could not get token: {}", other)),
    })?;

    match ctx.music.user().await {
        Ok(user) => info!(
            user = %user.name.as_deref().unwrap_or(&user.id),
            "Logged in to Spotify"
        ),
        Err(e) => warn!(error = %e, "Token obtained but user lookup failed"),
    }
    Ok(Redirect::temporary("/"))
}

/// GET / on the admin listener - redirect to the Spotify login
pub async fn login(State(ctx): State<AppContext>) -> Response {
    match ctx.oauth.authorize_url() {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
