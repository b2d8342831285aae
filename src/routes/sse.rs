use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dto::caller::Caller,
    error::AppError,
    services::{room_service::parse_room_id, sse_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/rooms/{room_id}/events",
    tag = "sse",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses((status = 200, description = "Room SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream the room to the caller: a snapshot on every change plus connectivity notices.
pub async fn room_stream(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    info!(%room_id, player_id = ?caller.player_id(), "New room SSE connection");
    Ok(sse_service::room_stream(&state, caller, room_id).await?)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{room_id}/events", get(room_stream))
}
