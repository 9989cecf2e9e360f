//! GET /now-playing-live - live now-playing stream
//!
//! Each connection opens one [`Subscription`](crate::realtime::Subscription)
//! on the realtime service and forwards every update as a rendered widget.
//! The stream ends when the service closes the conduit (slow reader or
//! shutdown); a viewer disconnect drops the stream and with it the
//! subscription.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, CONNECTION};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tracing::{debug, warn};

use super::AppContext;
use crate::ui;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn now_playing_live(
    State(ctx): State<AppContext>,
) -> (HeaderMap, Sse<impl Stream<Item = Result<Event, Infallible>>>) {
    let mut subscription = ctx.realtime.open_subscription().await;
    let id = subscription.id();
    debug!(subscriber = %id, "Live viewer connected");

    let stream = async_stream::stream! {
        while let Some(update) = subscription.recv().await {
            yield Ok(Event::default().data(ui::now_playing_widget(Some(&update))));
        }
        debug!(subscriber = %id, "Live stream closed by service");
    };

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    );

    (stream_headers(&ctx.settings.server_name), sse)
}

/// Headers added on top of the ones `Sse` sets itself
fn stream_headers(server_name: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    match HeaderValue::from_str(server_name) {
        Ok(origin) => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        Err(e) => warn!(
            server_name = %server_name,
            error = %e,
            "Server name is not a valid origin header"
        ),
    }
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("Content-Type"));
    headers
}
