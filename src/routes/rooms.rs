use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::{
        caller::Caller,
        room::{
            AdvanceRoundRequest, CreateRoomRequest, RoomSnapshot, RulesInput, SubmitAnswersRequest,
            ValidateAnswerRequest,
        },
    },
    error::AppError,
    services::room_service::{self, parse_room_id},
    state::{
        SharedState,
        stats::{RoundSummary, StatsReport},
    },
};

/// Room lifecycle and gameplay endpoints. Identity comes from the `x-player-*` headers.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{room_id}", get(get_room))
        .route("/rooms/{room_id}/join", post(join_room))
        .route("/rooms/{room_id}/settings", put(update_settings))
        .route("/rooms/{room_id}/start", post(start_game))
        .route("/rooms/{room_id}/answers", post(submit_answers))
        .route("/rooms/{room_id}/validate", post(validate_answer))
        .route("/rooms/{room_id}/advance", post(advance_round))
        .route("/rooms/{room_id}/leave", post(leave_room))
        .route("/rooms/{room_id}/stats", get(get_stats))
        .route("/rooms/{room_id}/summary", get(get_round_summary))
}

/// Open a new room; the caller becomes its admin.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    params(
        ("X-Player-Id" = String, Header, description = "Caller's player identifier"),
        ("X-Player-Name" = Option<String>, Header, description = "Caller's display name")
    ),
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomSnapshot),
        (status = 400, description = "Invalid settings", body = crate::error::ErrorBody),
        (status = 409, description = "Room identifier already taken", body = crate::error::ErrorBody)
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<RoomSnapshot>), AppError> {
    let snapshot = room_service::create_room(&state, caller, payload).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Current snapshot of a room, tailored to the caller.
#[utoipa::path(
    get,
    path = "/rooms/{room_id}",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomSnapshot),
        (status = 404, description = "Unknown room", body = crate::error::ErrorBody)
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(room_service::get_room(&state, &caller, &room_id).await?))
}

/// Join the room, or come back after leaving it.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/join",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Joined", body = RoomSnapshot),
        (status = 409, description = "Room full, already joined or game running", body = crate::error::ErrorBody)
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(room_service::join(&state, caller, &room_id).await?))
}

/// Replace the rules while the room is in the lobby. Admin only.
#[utoipa::path(
    put,
    path = "/rooms/{room_id}/settings",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    request_body = RulesInput,
    responses(
        (status = 200, description = "Settings updated", body = RoomSnapshot),
        (status = 403, description = "Caller is not the admin", body = crate::error::ErrorBody)
    )
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
    Valid(Json(payload)): Valid<Json<RulesInput>>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(
        room_service::update_settings(&state, caller, &room_id, payload).await?,
    ))
}

/// Start the first round. Admin only, at least two players.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/start",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Round 1 started", body = RoomSnapshot),
        (status = 403, description = "Caller is not the admin", body = crate::error::ErrorBody),
        (status = 409, description = "Not in the lobby or not enough players", body = crate::error::ErrorBody)
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(room_service::start_game(&state, caller, &room_id).await?))
}

/// Hand in the caller's answers for the running round.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/answers",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    request_body = SubmitAnswersRequest,
    responses(
        (status = 200, description = "Answers recorded", body = RoomSnapshot),
        (status = 409, description = "Already submitted or no round running", body = crate::error::ErrorBody)
    )
)]
pub async fn submit_answers(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitAnswersRequest>>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(
        room_service::submit_answers(&state, caller, &room_id, payload.answers).await?,
    ))
}

/// Accept or reject one answer of the reviewed round. Admin only.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/validate",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    request_body = ValidateAnswerRequest,
    responses(
        (status = 200, description = "Verdict recorded", body = RoomSnapshot),
        (status = 404, description = "No such answer", body = crate::error::ErrorBody),
        (status = 409, description = "Already validated or not reviewing", body = crate::error::ErrorBody)
    )
)]
pub async fn validate_answer(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
    Json(payload): Json<ValidateAnswerRequest>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(
        room_service::validate_answer(&state, caller, &room_id, payload).await?,
    ))
}

/// Close the reviewed round. Admin only.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/advance",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    request_body = AdvanceRoundRequest,
    responses(
        (status = 200, description = "Next round started or game finished", body = RoomSnapshot),
        (status = 409, description = "Answers still pending or not reviewing", body = crate::error::ErrorBody)
    )
)]
pub async fn advance_round(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
    Json(payload): Json<AdvanceRoundRequest>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(
        room_service::advance_round(&state, caller, &room_id, payload).await?,
    ))
}

/// Leave the room; score and roster entry are kept.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/leave",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Left the room", body = RoomSnapshot),
        (status = 409, description = "Already left or game finished", body = crate::error::ErrorBody)
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    caller: Caller,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(room_service::leave(&state, caller, &room_id).await?))
}

/// Final ranking and per-player statistics of a finished room.
#[utoipa::path(
    get,
    path = "/rooms/{room_id}/stats",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Final statistics", body = StatsReport),
        (status = 409, description = "Room not finished", body = crate::error::ErrorBody)
    )
)]
pub async fn get_stats(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<StatsReport>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(room_service::final_stats(&state, &room_id).await?))
}

/// Summary of the round under review.
#[utoipa::path(
    get,
    path = "/rooms/{room_id}/summary",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Round summary", body = RoundSummary),
        (status = 409, description = "No round under review", body = crate::error::ErrorBody)
    )
)]
pub async fn get_round_summary(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoundSummary>, AppError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(room_service::round_summary(&state, &room_id).await?))
}
