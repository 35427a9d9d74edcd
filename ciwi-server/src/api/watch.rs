//! WatchState API Handlers
//!
//! Server-sent event stream of periodic state snapshots, plus a one-shot
//! snapshot for polling clients.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use ciwi_core::dto::state::StateSnapshot;
use futures::stream::{self, Stream};

use crate::api::error::ApiResult;
use crate::service::watch_service;
use crate::state::AppState;

/// GET /state
/// One snapshot
pub async fn get_state(State(state): State<AppState>) -> ApiResult<Json<StateSnapshot>> {
    let stream_id = uuid::Uuid::new_v4().to_string();
    Ok(Json(watch_service::snapshot(&state, &stream_id, 0).await?))
}

/// GET /state/stream
/// Snapshot every `state_stream_interval` until the client goes away
pub async fn stream_state(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream_id = uuid::Uuid::new_v4().to_string();
    let period = state.config.state_stream_interval;
    tracing::debug!(stream_id = %stream_id, "State stream opened");

    let events = stream::unfold((state, 0u64), move |(state, seq)| {
        let stream_id = stream_id.clone();
        async move {
            if seq > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = state.shutdown.cancelled() => return None,
                }
            }

            let event = match watch_service::snapshot(&state, &stream_id, seq).await {
                Ok(snapshot) => Event::default()
                    .event("state")
                    .json_data(&snapshot)
                    .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
                Err(e) => {
                    tracing::warn!(stream_id = %stream_id, "State snapshot failed: {}", e);
                    Event::default().event("error").data("snapshot failed")
                }
            };
            Some((Ok(event), (state, seq + 1)))
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
