//! Server-Sent Events (SSE) utilities
//!
//! Turns a progress [`Subscriber`] into an SSE response body.

use crate::events::Subscriber;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info};

/// Interval between keep-alive comments on idle streams
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Build the SSE event for one progress line
///
/// `data` carries the message text and `id` the publish sequence. Carriage
/// returns become line breaks, so a multi-line message arrives as several
/// `data:` lines that the client joins with `\n`.
pub fn progress_event(event: &crate::ProgressEvent) -> Event {
    Event::default()
        .id(event.sequence.to_string())
        .data(event_data(&event.message))
}

/// SSE-safe form of a progress message
pub fn event_data(message: &str) -> String {
    message.replace("\r\n", "\n").replace('\r', "\n")
}

/// Create an SSE stream that forwards every line the subscriber receives
///
/// The stream ends after the terminal line. If the client disconnects the
/// stream is dropped, which drops the subscriber and unregisters it.
///
/// # Example
/// ```rust,ignore
/// pub async fn progress(
///     State(state): State<AppState>,
/// ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
///     guitarless_common::sse::progress_sse_stream(state.broadcaster.subscribe())
/// }
/// ```
pub fn progress_sse_stream(
    mut subscriber: Subscriber,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriber_id = subscriber.id();
    info!(subscriber_id, "New SSE client connected to progress stream");

    let stream = async_stream::stream! {
        while let Some(event) = subscriber.recv().await {
            debug!(subscriber_id, sequence = event.sequence, "SSE: forwarding progress line");
            yield Ok(progress_event(&event));
        }
        info!(subscriber_id, "SSE: progress stream finished");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("heartbeat"),
    )
}
