//! Server-Sent Events (SSE) for job progress
//!
//! Every observer sees every progress line published after it connects, in
//! publish order. Nothing is replayed. The stream closes after a terminal
//! line (`Done` or `Error: ...`).

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use tracing::debug;

use crate::AppState;

/// GET /progress
pub async fn progress_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriber = state.broadcaster.subscribe();
    debug!(
        subscriber_id = subscriber.id(),
        observers = state.broadcaster.subscriber_count(),
        "Progress observer attached"
    );
    guitarless_common::sse::progress_sse_stream(subscriber)
}

/// Build progress routes
pub fn progress_routes() -> Router<AppState> {
    Router::new().route("/progress", get(progress_stream))
}
