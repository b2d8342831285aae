use std::sync::Arc;

use indexmap::IndexMap;
use tracing::info;

use crate::{
    dto::{
        caller::Caller,
        room::{
            AdvanceRoundRequest, CreateRoomRequest, RoomSnapshot, RulesInput,
            ValidateAnswerRequest,
        },
    },
    error::ServiceError,
    state::{
        SharedState,
        room::{PlayerId, RoomDocument, RoomId},
        stats::{self, RoundSummary, StatsReport},
    },
    sync::{Connection, Intent, SyncError},
};

/// Parse a room identifier taken from the path.
pub fn parse_room_id(raw: &str) -> Result<RoomId, ServiceError> {
    RoomId::parse(raw).map_err(|err| ServiceError::InvalidInput(err.to_string()))
}

/// Open a new room administered by the caller and start hosting it.
pub async fn create_room(
    state: &SharedState,
    caller: Caller,
    request: CreateRoomRequest,
) -> Result<RoomSnapshot, ServiceError> {
    let room_id = request.room_id.as_deref().map(parse_room_id).transpose()?;
    let store = state.require_room_store().await?;
    let viewer = caller.player_id().cloned();

    let engine = state
        .engine_builder(store, Arc::new(caller), false)
        .create(room_id, request.rules.into())
        .await?;
    let room = engine
        .snapshot()
        .document
        .ok_or(ServiceError::Sync(SyncError::ViewClosed))?;

    state.host_room(&room.room_id).await?;
    info!(room_id = %room.room_id, "room opened");
    Ok(render(state, &room, viewer.as_ref(), Connection::Live).await)
}

/// Current snapshot of a room for the caller.
pub async fn get_room(
    state: &SharedState,
    caller: &Caller,
    room_id: &RoomId,
) -> Result<RoomSnapshot, ServiceError> {
    let (room, connection) = hosted_document(state, room_id).await?;
    Ok(render(state, &room, caller.player_id(), connection).await)
}

/// Join the room, or come back after leaving it.
pub async fn join(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
) -> Result<RoomSnapshot, ServiceError> {
    dispatch(state, caller, room_id, Intent::Join).await
}

/// Replace the rules while the room is in the lobby.
pub async fn update_settings(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
    rules: RulesInput,
) -> Result<RoomSnapshot, ServiceError> {
    dispatch(state, caller, room_id, Intent::UpdateSettings(rules.into())).await
}

/// Start the first round.
pub async fn start_game(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
) -> Result<RoomSnapshot, ServiceError> {
    dispatch(state, caller, room_id, Intent::StartGame).await
}

/// Hand in the caller's answer sheet.
pub async fn submit_answers(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
    answers: IndexMap<String, String>,
) -> Result<RoomSnapshot, ServiceError> {
    dispatch(state, caller, room_id, Intent::SubmitAnswers(answers)).await
}

/// Rule on one answer of the reviewed round.
pub async fn validate_answer(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
    request: ValidateAnswerRequest,
) -> Result<RoomSnapshot, ServiceError> {
    let player_id = PlayerId::parse(request.player_id)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let intent = Intent::ValidateAnswer {
        player_id,
        category: request.category,
        valid: request.valid,
    };
    dispatch(state, caller, room_id, intent).await
}

/// Close the reviewed round and open the next one, or finish the game.
pub async fn advance_round(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
    request: AdvanceRoundRequest,
) -> Result<RoomSnapshot, ServiceError> {
    dispatch(
        state,
        caller,
        room_id,
        Intent::AdvanceRound {
            force: request.force,
        },
    )
    .await
}

/// Mark the caller as gone; roster and scores are kept.
pub async fn leave(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
) -> Result<RoomSnapshot, ServiceError> {
    dispatch(state, caller, room_id, Intent::Leave).await
}

/// Final statistics of a finished room.
pub async fn final_stats(
    state: &SharedState,
    room_id: &RoomId,
) -> Result<StatsReport, ServiceError> {
    let (room, _) = hosted_document(state, room_id).await?;
    Ok(stats::aggregate(&room)?)
}

/// Summary of the round under review.
pub async fn round_summary(
    state: &SharedState,
    room_id: &RoomId,
) -> Result<RoundSummary, ServiceError> {
    let (room, _) = hosted_document(state, room_id).await?;
    Ok(stats::current_round_summary(&room)?)
}

/// Latest document of a hosted room, re-read from the store when it is reachable.
///
/// The host is released afterwards when the room no longer needs one.
async fn hosted_document(
    state: &SharedState,
    room_id: &RoomId,
) -> Result<(Arc<RoomDocument>, Connection), ServiceError> {
    let host = state.host_room(room_id).await?;
    let view = host.refresh().await;
    drop(host);
    state.release_idle_room(room_id);

    match (view.connection, view.document) {
        (Connection::Corrupt, _) => Err(SyncError::Corrupt {
            room_id: room_id.clone(),
            reason: view.error.unwrap_or_default(),
        }
        .into()),
        (connection, Some(room)) => Ok((room, connection)),
        (_, None) => Err(SyncError::NotFound(room_id.clone()).into()),
    }
}

async fn dispatch(
    state: &SharedState,
    caller: Caller,
    room_id: &RoomId,
    intent: Intent,
) -> Result<RoomSnapshot, ServiceError> {
    let viewer = caller.player_id().cloned();
    let engine = state.caller_engine(room_id, Arc::new(caller)).await?;
    let room = engine.dispatch(intent).await?;
    state.settle_room(&room);
    Ok(render(state, &room, viewer.as_ref(), Connection::Live).await)
}

async fn render(
    state: &SharedState,
    room: &RoomDocument,
    viewer: Option<&PlayerId>,
    connection: Connection,
) -> RoomSnapshot {
    RoomSnapshot::build(
        room,
        viewer,
        connection,
        state.clock().now(),
        state.is_degraded().await,
    )
}
