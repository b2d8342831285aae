use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        format_timestamp,
        validation::{
            validate_answer_text, validate_categories, validate_round_seconds, validate_rounds,
        },
    },
    state::room::{
        Answer, Language, Player, PlayerId, RoomDocument, RoomRules, RoomSettings, RoomStatus,
        RoundState, Timestamp,
    },
    sync::Connection,
};

/// Game rules chosen by the admin.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RulesInput {
    /// Number of rounds, 1 to 20.
    pub rounds_total: u32,
    /// Round length in seconds, 10 to 600.
    pub time_per_round_seconds: u32,
    /// Ordered category labels. The language's default list is used when omitted.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Language of the prompt alphabet (`en`, `es`, `fr`, `de`).
    #[schema(value_type = String, example = "en")]
    pub language: Language,
    /// End the round as soon as the first sheet is handed in.
    #[serde(default)]
    pub end_round_on_first_submit: bool,
}

impl Validate for RulesInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_rounds(self.rounds_total) {
            errors.add("rounds_total", e);
        }
        if let Err(e) = validate_round_seconds(self.time_per_round_seconds) {
            errors.add("time_per_round_seconds", e);
        }
        if let Some(categories) = &self.categories
            && let Err(e) = validate_categories(categories)
        {
            errors.add("categories", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<RulesInput> for RoomRules {
    fn from(input: RulesInput) -> Self {
        RoomRules {
            rounds_total: input.rounds_total,
            time_per_round_seconds: input.time_per_round_seconds,
            categories: input.categories.unwrap_or_else(|| {
                input
                    .language
                    .default_categories()
                    .iter()
                    .map(|category| category.to_string())
                    .collect()
            }),
            language: input.language,
            end_round_on_first_submit: input.end_round_on_first_submit,
        }
    }
}

/// Payload used to open a new room; the caller becomes its admin.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    /// Requested identifier. A fresh one is generated when omitted.
    #[serde(default)]
    pub room_id: Option<String>,
    /// Initial rules.
    #[serde(flatten)]
    #[validate(nested)]
    pub rules: RulesInput,
}

/// Answer sheet handed in for the running round.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAnswersRequest {
    /// Category label to answer text. Blank answers are dropped.
    #[schema(value_type = Object)]
    pub answers: IndexMap<String, String>,
}

impl Validate for SubmitAnswersRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for text in self.answers.values() {
            if let Err(e) = validate_answer_text(text) {
                errors.add("answers", e);
                break;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Admin verdict on one answer of the reviewed round.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateAnswerRequest {
    /// Owner of the answer.
    pub player_id: String,
    /// Category of the answer.
    pub category: String,
    /// Whether the answer is accepted.
    pub valid: bool,
}

/// Request to close the reviewed round.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AdvanceRoundRequest {
    /// Close the round even if some answers have no verdict; they count as wrong.
    #[serde(default)]
    pub force: bool,
}

/// Room rules as stored.
#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsView {
    /// Number of rounds.
    pub rounds_total: u32,
    /// Round length in seconds.
    pub time_per_round_seconds: u32,
    /// Ordered category labels.
    pub categories: Vec<String>,
    /// Prompt language code.
    pub language: String,
    /// Quick-finish mode.
    pub end_round_on_first_submit: bool,
    /// Identifier of the admin.
    pub admin_id: String,
}

impl From<&RoomSettings> for SettingsView {
    fn from(settings: &RoomSettings) -> Self {
        Self {
            rounds_total: settings.rounds_total,
            time_per_round_seconds: settings.time_per_round_seconds,
            categories: settings.categories.clone(),
            language: settings.language.code().to_string(),
            end_round_on_first_submit: settings.end_round_on_first_submit,
            admin_id: settings.admin_id.to_string(),
        }
    }
}

/// Roster entry.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerView {
    /// Player identifier.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Current score.
    pub score: u32,
    /// Whether the player administers the room.
    pub is_admin: bool,
    /// Whether the player is currently in the room.
    pub connected: bool,
    /// When the player joined, RFC 3339.
    pub joined_at: String,
}

impl PlayerView {
    fn new(player_id: &PlayerId, player: &Player) -> Self {
        Self {
            player_id: player_id.to_string(),
            name: player.name.clone(),
            score: player.score,
            is_admin: player.is_admin,
            connected: player.connected,
            joined_at: format_timestamp(player.joined_at),
        }
    }
}

/// One submitted answer.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerView {
    /// Answer text.
    pub text: String,
    /// When the sheet was handed in, RFC 3339.
    pub submitted_at: String,
    /// Admin verdict, `null` while pending.
    pub validated: Option<bool>,
}

impl From<&Answer> for AnswerView {
    fn from(answer: &Answer) -> Self {
        Self {
            text: answer.text.clone(),
            submitted_at: format_timestamp(answer.submitted_at),
            validated: answer.validated,
        }
    }
}

/// The live round as seen by one viewer.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundView {
    /// Letter of the round.
    pub prompt: String,
    /// Round start, RFC 3339.
    pub started_at: String,
    /// Moment the round stopped accepting answers, RFC 3339.
    pub ended_at: Option<String>,
    /// Players that handed in a sheet, in submission order.
    pub submitted: Vec<String>,
    /// Answers still waiting for a verdict.
    pub pending_validations: usize,
    /// Visible answers by player then category. While playing, only the viewer's own.
    #[schema(value_type = Object)]
    pub answers: IndexMap<String, IndexMap<String, AnswerView>>,
}

impl RoundView {
    fn new(round: &RoundState, status: RoomStatus, viewer: Option<&PlayerId>) -> Self {
        let answers = round
            .answers
            .iter()
            .filter(|(player_id, _)| status != RoomStatus::Playing || Some(*player_id) == viewer)
            .map(|(player_id, sheet)| {
                let sheet = sheet
                    .iter()
                    .map(|(category, answer)| (category.clone(), AnswerView::from(answer)))
                    .collect();
                (player_id.to_string(), sheet)
            })
            .collect();

        Self {
            prompt: round.prompt.clone(),
            started_at: format_timestamp(round.started_at),
            ended_at: round.ended_at.map(format_timestamp),
            submitted: round.answers.keys().map(ToString::to_string).collect(),
            pending_validations: round.pending_validations(),
            answers,
        }
    }
}

/// Snapshot of a room tailored to one viewer.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSnapshot {
    /// Room identifier.
    pub room_id: String,
    /// Document version the snapshot was taken from.
    pub version: u64,
    /// Lifecycle status.
    #[schema(value_type = String, example = "lobby")]
    pub status: RoomStatus,
    /// Connectivity of the server's view of the room.
    #[schema(value_type = String, example = "live")]
    pub connection: Connection,
    /// Current rules.
    pub settings: SettingsView,
    /// Roster in join order.
    pub players: Vec<PlayerView>,
    /// 1-based round number, 0 in the lobby.
    pub current_round: u32,
    /// Rounds already closed.
    pub rounds_played: usize,
    /// Live round, when one is running or under review.
    pub round: Option<RoundView>,
    /// Milliseconds left in the running round.
    pub time_remaining_ms: Option<u64>,
    /// Whether the viewer administers the room.
    pub is_admin: bool,
    /// Whether the backend is running without storage.
    pub degraded: bool,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Last write, RFC 3339.
    pub updated_at: String,
}

impl RoomSnapshot {
    /// Render `room` for `viewer` at `now`.
    pub fn build(
        room: &RoomDocument,
        viewer: Option<&PlayerId>,
        connection: Connection,
        now: Timestamp,
        degraded: bool,
    ) -> Self {
        Self {
            room_id: room.room_id.to_string(),
            version: room.version,
            status: room.status,
            connection,
            settings: SettingsView::from(&room.settings),
            players: room
                .players
                .iter()
                .map(|(player_id, player)| PlayerView::new(player_id, player))
                .collect(),
            current_round: room.current_round,
            rounds_played: room.completed_rounds.len(),
            round: room
                .round_state
                .as_ref()
                .map(|round| RoundView::new(round, room.status, viewer)),
            time_remaining_ms: room
                .time_remaining(now)
                .map(|left| u64::try_from(left.as_millis()).unwrap_or(u64::MAX)),
            is_admin: viewer.is_some_and(|player_id| room.is_admin(player_id.as_str())),
            degraded,
            created_at: format_timestamp(room.created_at),
            updated_at: format_timestamp(room.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::RoomId;

    fn room() -> RoomDocument {
        let settings = RoomSettings::from_rules(
            RoomRules {
                rounds_total: 2,
                time_per_round_seconds: 30,
                categories: vec!["Animal".into(), "Fruit".into()],
                language: Language::En,
                end_round_on_first_submit: false,
            },
            "ada",
        )
        .unwrap();
        let mut room = RoomDocument::new(
            RoomId::parse("r1").unwrap(),
            settings,
            "Ada",
            Timestamp::from_millis(0),
        )
        .unwrap();
        room.players.insert(
            PlayerId::parse("bob").unwrap(),
            Player {
                name: "Bob".into(),
                score: 0,
                is_admin: false,
                joined_at: Timestamp::from_millis(10),
                connected: true,
            },
        );
        room.status = RoomStatus::Playing;
        room.current_round = 1;
        let mut round = RoundState::new("L".into(), Timestamp::from_millis(1_000));
        for (player, text) in [("ada", "Lion"), ("bob", "Lemon")] {
            let mut sheet = IndexMap::new();
            sheet.insert(
                "Animal".to_string(),
                Answer {
                    text: text.into(),
                    submitted_at: Timestamp::from_millis(5_000),
                    validated: None,
                },
            );
            round.answers.insert(PlayerId::parse(player).unwrap(), sheet);
        }
        room.round_state = Some(round);
        room
    }

    #[test]
    fn playing_snapshot_hides_other_players_answers() {
        let room = room();
        let bob = PlayerId::parse("bob").unwrap();
        let snapshot = RoomSnapshot::build(
            &room,
            Some(&bob),
            Connection::Live,
            Timestamp::from_millis(11_000),
            false,
        );

        let round = snapshot.round.unwrap();
        assert_eq!(round.submitted, ["ada", "bob"]);
        assert_eq!(round.answers.keys().collect::<Vec<_>>(), ["bob"]);
        assert_eq!(snapshot.time_remaining_ms, Some(20_000));
        assert!(!snapshot.is_admin);
    }

    #[test]
    fn reviewing_snapshot_shows_every_answer_to_the_admin() {
        let mut room = room();
        room.status = RoomStatus::Reviewing;
        if let Some(round) = room.round_state.as_mut() {
            round.ended_at = Some(Timestamp::from_millis(31_000));
        }
        let ada = PlayerId::parse("ada").unwrap();
        let snapshot = RoomSnapshot::build(
            &room,
            Some(&ada),
            Connection::Live,
            Timestamp::from_millis(40_000),
            false,
        );

        let round = snapshot.round.unwrap();
        assert_eq!(round.answers.len(), 2);
        assert_eq!(round.pending_validations, 2);
        assert_eq!(snapshot.time_remaining_ms, None);
        assert!(snapshot.is_admin);

        let json = serde_json::to_value(RoomSnapshot::build(
            &room,
            None,
            Connection::Live,
            Timestamp::from_millis(40_000),
            true,
        ))
        .unwrap();
        assert_eq!(json["status"], "reviewing");
        assert_eq!(json["connection"], "live");
        assert_eq!(json["degraded"], true);
    }

    #[test]
    fn rules_input_enforces_form_limits() {
        let input: CreateRoomRequest = serde_json::from_str(
            r#"{"rounds_total": 3, "time_per_round_seconds": 5, "categories": ["Animal"], "language": "fr"}"#,
        )
        .unwrap();
        let errors = input.validate().unwrap_err();
        assert!(errors.errors().contains_key("rules"));
        assert!(input.room_id.is_none());
        assert!(!input.rules.end_round_on_first_submit);

        let ok: RulesInput = serde_json::from_str(
            r#"{"rounds_total": 3, "time_per_round_seconds": 60, "categories": ["Animal"], "language": "de", "end_round_on_first_submit": true}"#,
        )
        .unwrap();
        assert!(ok.validate().is_ok());
        let rules = RoomRules::from(ok);
        assert_eq!(rules.language, Language::De);
        assert_eq!(rules.categories, vec!["Animal".to_string()]);
    }

    #[test]
    fn omitted_categories_follow_the_language() {
        let spanish: RulesInput = serde_json::from_str(
            r#"{"rounds_total": 2, "time_per_round_seconds": 60, "language": "es"}"#,
        )
        .unwrap();
        assert!(spanish.validate().is_ok());
        let rules = RoomRules::from(spanish);
        assert_eq!(rules.categories, ["Nombre", "Apellido", "Fruta", "Color", "Cosa"]);

        let english: RulesInput = serde_json::from_str(
            r#"{"rounds_total": 2, "time_per_round_seconds": 60, "language": "en"}"#,
        )
        .unwrap();
        assert_eq!(
            RoomRules::from(english).categories,
            ["Name", "Surname", "Fruit", "Color", "Thing"]
        );

        let empty: RulesInput = serde_json::from_str(
            r#"{"rounds_total": 2, "time_per_round_seconds": 60, "categories": [], "language": "en"}"#,
        )
        .unwrap();
        assert!(empty.validate().unwrap_err().errors().contains_key("categories"));

        for language in Language::ALL {
            let settings = RoomSettings::from_rules(
                RoomRules {
                    rounds_total: 1,
                    time_per_round_seconds: 30,
                    categories: Vec::new(),
                    language,
                    end_round_on_first_submit: false,
                },
                "admin",
            );
            assert!(settings.is_err());
            let defaults = language
                .default_categories()
                .iter()
                .map(|category| category.to_string())
                .collect();
            let settings = RoomSettings::from_rules(
                RoomRules {
                    rounds_total: 1,
                    time_per_round_seconds: 30,
                    categories: defaults,
                    language,
                    end_round_on_first_submit: false,
                },
                "admin",
            );
            assert!(settings.is_ok());
        }
    }
}
