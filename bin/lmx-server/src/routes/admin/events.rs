//! `GET /admin/events` — SSE feed of `ServerEvent`s from the event bus.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(stream_events))
}

pub async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.events.subscribe().await;

    let body: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> = match subscription {
        Some(subscription) => Box::pin(ReceiverStream::new(subscription.rx).map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Ok(Event::default().event(event.event_type.clone()).data(data))
        })),
        None => Box::pin(stream::empty()),
    };

    Sse::new(body).keep_alive(KeepAlive::default())
}
