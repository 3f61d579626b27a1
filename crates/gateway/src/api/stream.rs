//! `GET /v1/bots/:id/stream` — SSE fan-out off the route hub.
//!
//! Every event is one JSON object on a `data:` line; `[DONE]` closes the
//! stream after a terminal event.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_core::Stream;

use bh_channels::sse::DONE_MARKER;

use crate::state::AppState;

pub async fn bot_stream(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.hub.subscribe(&bot_id);

    let stream = async_stream::stream! {
        while let Some(event) = subscription.rx.recv().await {
            let terminal = event.is_terminal();
            let payload = serde_json::to_string(&event)
                .unwrap_or_else(|_| "{}".to_string());
            yield Ok(Event::default().data(payload));
            if terminal {
                yield Ok(Event::default().data(DONE_MARKER));
                break;
            }
        }
        subscription.cancel();
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
