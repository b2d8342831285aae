use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Word Rooms Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::update_settings,
        crate::routes::rooms::start_game,
        crate::routes::rooms::submit_answers,
        crate::routes::rooms::validate_answer,
        crate::routes::rooms::advance_round,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::get_stats,
        crate::routes::rooms::get_round_summary,
        crate::routes::sse::room_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::RulesInput,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::SubmitAnswersRequest,
            crate::dto::room::ValidateAnswerRequest,
            crate::dto::room::AdvanceRoundRequest,
            crate::dto::room::RoomSnapshot,
            crate::dto::room::SettingsView,
            crate::dto::room::PlayerView,
            crate::dto::room::RoundView,
            crate::dto::room::AnswerView,
            crate::dto::sse::Handshake,
            crate::dto::sse::ConnectionStatus,
            crate::dto::sse::SystemStatus,
            crate::state::stats::StatsReport,
            crate::state::stats::RankingEntry,
            crate::state::stats::PlayerStats,
            crate::state::stats::RoundSummary,
            crate::state::stats::RoundScore,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room lifecycle and gameplay"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
