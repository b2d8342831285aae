//! Pure transition function of a room.
//!
//! [`RoomStateMachine::apply`] takes a validated [`RoomDocument`] and a [`Command`] and
//! either returns the successor document or a [`Rejection`] naming the broken rule. It
//! never performs I/O: prompts are drawn by the caller and passed inside the action,
//! timestamps come with the command.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::state::room::{
    Answer, AnswerSheet, Player, PlayerId, RoomDocument, RoomRules, RoomSettings, RoomStatus,
    RoundRecord, RoundState, Timestamp,
};

/// Points awarded for every answer the admin validates as correct.
pub const POINTS_PER_CORRECT_ANSWER: u32 = 5;

/// Who is asking for a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// A player identified by the identity collaborator.
    Player(PlayerId),
    /// The round timer owned by a sync engine.
    System,
}

/// Actions that can be applied to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Enter the room, or reconnect a previously registered player.
    Join {
        /// Display name shown to the other players.
        name: String,
    },
    /// Replace the rules while the room is still in the lobby.
    UpdateSettings(RoomRules),
    /// Admin starts the first round.
    StartGame {
        /// Letter drawn for round 1.
        prompt: String,
    },
    /// A player hands in their answer sheet for the running round.
    SubmitAnswers {
        /// Answer text keyed by category.
        answers: IndexMap<String, String>,
    },
    /// The round clock ran out.
    TimerExpired,
    /// Admin rules on one submitted answer.
    ValidateAnswer {
        /// Owner of the answer.
        player_id: PlayerId,
        /// Category of the answer.
        category: String,
        /// Verdict.
        valid: bool,
    },
    /// Admin closes the reviewed round.
    AdvanceRound {
        /// Close the round even if answers are still unvalidated.
        force: bool,
        /// Letter drawn for the next round; ignored after the last round.
        prompt: String,
    },
    /// Player leaves the room view.
    Leave,
}

/// Payload-free discriminant of [`Action`], used in rejections and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    /// [`Action::Join`].
    Join,
    /// [`Action::UpdateSettings`].
    UpdateSettings,
    /// [`Action::StartGame`].
    StartGame,
    /// [`Action::SubmitAnswers`].
    SubmitAnswers,
    /// [`Action::TimerExpired`].
    TimerExpired,
    /// [`Action::ValidateAnswer`].
    ValidateAnswer,
    /// [`Action::AdvanceRound`].
    AdvanceRound,
    /// [`Action::Leave`].
    Leave,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Join => "join",
            ActionKind::UpdateSettings => "updateSettings",
            ActionKind::StartGame => "startGame",
            ActionKind::SubmitAnswers => "submitAnswers",
            ActionKind::TimerExpired => "timerExpired",
            ActionKind::ValidateAnswer => "validateAnswer",
            ActionKind::AdvanceRound => "advanceRound",
            ActionKind::Leave => "leave",
        };
        f.write_str(name)
    }
}

impl Action {
    /// Discriminant of the action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Join { .. } => ActionKind::Join,
            Action::UpdateSettings(_) => ActionKind::UpdateSettings,
            Action::StartGame { .. } => ActionKind::StartGame,
            Action::SubmitAnswers { .. } => ActionKind::SubmitAnswers,
            Action::TimerExpired => ActionKind::TimerExpired,
            Action::ValidateAnswer { .. } => ActionKind::ValidateAnswer,
            Action::AdvanceRound { .. } => ActionKind::AdvanceRound,
            Action::Leave => ActionKind::Leave,
        }
    }
}

/// An action attributed to an actor at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Who asks for the transition.
    pub actor: Actor,
    /// What is requested.
    pub action: Action,
    /// When the request is evaluated.
    pub at: Timestamp,
}

impl Command {
    /// Command issued by a player.
    pub fn by_player(player_id: PlayerId, action: Action, at: Timestamp) -> Self {
        Self {
            actor: Actor::Player(player_id),
            action,
            at,
        }
    }

    /// Command issued by the round timer.
    pub fn by_system(action: Action, at: Timestamp) -> Self {
        Self {
            actor: Actor::System,
            action,
            at,
        }
    }
}

/// Stable reason code attached to every rejected command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RejectReason {
    /// Only the admin may perform the action.
    NotAdmin,
    /// The action is not valid in the current status.
    WrongState,
    /// The player already handed in a sheet this round.
    AlreadySubmitted,
    /// The capacity policy refuses another player.
    RoomFull,
    /// The room, player or answer does not exist.
    NotFound,
    /// The player is already in the room and connected.
    AlreadyJoined,
    /// The player left the room.
    NotConnected,
    /// The answer already carries a verdict.
    AlreadyValidated,
    /// Answers are still waiting for a verdict.
    PendingValidations,
    /// The round clock has not run out yet.
    TimerRunning,
    /// At least two players are needed to start.
    NotEnoughPlayers,
    /// The request payload is malformed.
    InvalidInput,
}

impl RejectReason {
    /// Code exposed to clients.
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::NotAdmin => "NotAdmin",
            RejectReason::WrongState => "WrongState",
            RejectReason::AlreadySubmitted => "AlreadySubmitted",
            RejectReason::RoomFull => "RoomFull",
            RejectReason::NotFound => "NotFound",
            RejectReason::AlreadyJoined => "AlreadyJoined",
            RejectReason::NotConnected => "NotConnected",
            RejectReason::AlreadyValidated => "AlreadyValidated",
            RejectReason::PendingValidations => "PendingValidations",
            RejectReason::TimerRunning => "TimerRunning",
            RejectReason::NotEnoughPlayers => "NotEnoughPlayers",
            RejectReason::InvalidInput => "InvalidInput",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when a command cannot be applied to a room.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} rejected while {status} ({reason}): {detail}")]
pub struct Rejection {
    /// Stable reason code.
    pub reason: RejectReason,
    /// Status the room was in.
    pub status: RoomStatus,
    /// Action that was refused.
    pub action: ActionKind,
    /// Human-readable explanation.
    pub detail: String,
}

/// Externally configured admission policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomPolicy {
    /// Maximum roster size, `None` for no cap.
    pub max_players: Option<usize>,
}

/// Pure transition function over room documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoomStateMachine {
    policy: RoomPolicy,
}

impl RoomStateMachine {
    /// Create a state machine with no capacity cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state machine enforcing `policy`.
    pub fn with_policy(policy: RoomPolicy) -> Self {
        Self { policy }
    }

    /// Admission policy in force.
    pub fn policy(&self) -> RoomPolicy {
        self.policy
    }

    /// Compute the document that results from applying `command` to `room`.
    ///
    /// The input is never modified and a rejection never yields a partial result.
    /// `version` and `updated_at` are left for the store to stamp.
    pub fn apply(&self, room: &RoomDocument, command: &Command) -> Result<RoomDocument, Rejection> {
        let kind = command.action.kind();
        let reject = |reason: RejectReason, detail: String| Rejection {
            reason,
            status: room.status,
            action: kind,
            detail,
        };

        if room.status == RoomStatus::Finished {
            return Err(reject(
                RejectReason::WrongState,
                "the game is over".to_string(),
            ));
        }

        let mut next = room.clone();
        let at = command.at;

        match (&command.actor, &command.action) {
            (Actor::Player(player_id), Action::Join { name }) => {
                if let Some(player) = next.players.get_mut(player_id) {
                    if player.connected {
                        return Err(reject(
                            RejectReason::AlreadyJoined,
                            format!("player `{player_id}` is already in the room"),
                        ));
                    }
                    player.connected = true;
                    return Ok(next);
                }

                if room.status != RoomStatus::Lobby {
                    return Err(reject(
                        RejectReason::WrongState,
                        "new players may only join in the lobby".to_string(),
                    ));
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(reject(
                        RejectReason::InvalidInput,
                        "display name must not be blank".to_string(),
                    ));
                }
                if let Some(max) = self.policy.max_players
                    && room.players.len() >= max
                {
                    return Err(reject(
                        RejectReason::RoomFull,
                        format!("the room already holds {max} players"),
                    ));
                }

                next.players.insert(
                    player_id.clone(),
                    Player {
                        name: name.to_string(),
                        score: 0,
                        is_admin: false,
                        joined_at: at,
                        connected: true,
                    },
                );
            }
            (Actor::Player(player_id), Action::UpdateSettings(rules)) => {
                require_admin(room, player_id)
                    .map_err(|detail| reject(RejectReason::NotAdmin, detail))?;
                if room.status != RoomStatus::Lobby {
                    return Err(reject(
                        RejectReason::WrongState,
                        "settings are frozen once the game started".to_string(),
                    ));
                }
                next.settings =
                    RoomSettings::from_rules(rules.clone(), room.settings.admin_id.as_str())
                        .map_err(|err| reject(RejectReason::InvalidInput, err.to_string()))?;
            }
            (Actor::Player(player_id), Action::StartGame { prompt }) => {
                require_admin(room, player_id)
                    .map_err(|detail| reject(RejectReason::NotAdmin, detail))?;
                if room.status != RoomStatus::Lobby {
                    return Err(reject(
                        RejectReason::WrongState,
                        "the game has already started".to_string(),
                    ));
                }
                if room.players.len() < 2 {
                    return Err(reject(
                        RejectReason::NotEnoughPlayers,
                        format!("{} player(s) in the room, 2 required", room.players.len()),
                    ));
                }
                let prompt = non_blank_prompt(prompt).ok_or_else(|| {
                    reject(RejectReason::InvalidInput, "prompt is blank".to_string())
                })?;

                next.status = RoomStatus::Playing;
                next.current_round = 1;
                next.round_state = Some(RoundState::new(prompt, at));
            }
            (Actor::Player(player_id), Action::SubmitAnswers { answers }) => {
                let Some(player) = room.players.get(player_id) else {
                    return Err(reject(
                        RejectReason::NotFound,
                        format!("player `{player_id}` is not in the room"),
                    ));
                };
                if room.status != RoomStatus::Playing {
                    return Err(reject(
                        RejectReason::WrongState,
                        "no round is accepting answers".to_string(),
                    ));
                }
                if !player.connected {
                    return Err(reject(
                        RejectReason::NotConnected,
                        format!("player `{player_id}` left the room"),
                    ));
                }
                let Some(round) = next.round_state.as_mut() else {
                    return Err(reject(
                        RejectReason::WrongState,
                        "no round is accepting answers".to_string(),
                    ));
                };
                if round.answers.contains_key(player_id) {
                    return Err(reject(
                        RejectReason::AlreadySubmitted,
                        format!("player `{player_id}` already submitted this round"),
                    ));
                }
                if let Some(unknown) = answers
                    .keys()
                    .find(|category| !room.settings.has_category(category))
                {
                    return Err(reject(
                        RejectReason::InvalidInput,
                        format!("unknown category `{unknown}`"),
                    ));
                }

                let sheet: AnswerSheet = answers
                    .iter()
                    .filter_map(|(category, text)| {
                        let text = text.trim();
                        (!text.is_empty()).then(|| {
                            (
                                category.clone(),
                                Answer {
                                    text: text.to_string(),
                                    submitted_at: at,
                                    validated: None,
                                },
                            )
                        })
                    })
                    .collect();

                let first_submission = round.answers.is_empty();
                round.answers.insert(player_id.clone(), sheet);

                if room.settings.end_round_on_first_submit && first_submission {
                    round.ended_at = Some(at);
                    next.status = RoomStatus::Reviewing;
                }
            }
            (Actor::System, Action::TimerExpired) => {
                if room.status != RoomStatus::Playing {
                    return Err(reject(
                        RejectReason::WrongState,
                        "no round is running".to_string(),
                    ));
                }
                let Some(deadline) = room.round_deadline() else {
                    return Err(reject(
                        RejectReason::WrongState,
                        "no round is running".to_string(),
                    ));
                };
                if at < deadline {
                    return Err(reject(
                        RejectReason::TimerRunning,
                        format!(
                            "{} ms left on the clock",
                            deadline.as_millis() - at.as_millis()
                        ),
                    ));
                }
                if let Some(round) = next.round_state.as_mut() {
                    round.ended_at = Some(at);
                }
                next.status = RoomStatus::Reviewing;
            }
            (Actor::Player(_), Action::TimerExpired) => {
                return Err(reject(
                    RejectReason::NotAdmin,
                    "only the round timer expires a round".to_string(),
                ));
            }
            (
                Actor::Player(admin_id),
                Action::ValidateAnswer {
                    player_id,
                    category,
                    valid,
                },
            ) => {
                require_admin(room, admin_id)
                    .map_err(|detail| reject(RejectReason::NotAdmin, detail))?;
                if room.status != RoomStatus::Reviewing {
                    return Err(reject(
                        RejectReason::WrongState,
                        "answers are validated during review".to_string(),
                    ));
                }
                let answer = next
                    .round_state
                    .as_mut()
                    .and_then(|round| round.answers.get_mut(player_id))
                    .and_then(|sheet| sheet.get_mut(category))
                    .ok_or_else(|| {
                        reject(
                            RejectReason::NotFound,
                            format!("no `{category}` answer from player `{player_id}`"),
                        )
                    })?;
                if answer.validated.is_some() {
                    return Err(reject(
                        RejectReason::AlreadyValidated,
                        format!("`{category}` answer from player `{player_id}` already validated"),
                    ));
                }
                answer.validated = Some(*valid);

                if *valid && let Some(player) = next.players.get_mut(player_id) {
                    player.score = player.score.saturating_add(POINTS_PER_CORRECT_ANSWER);
                }
            }
            (Actor::Player(player_id), Action::AdvanceRound { force, prompt }) => {
                require_admin(room, player_id)
                    .map_err(|detail| reject(RejectReason::NotAdmin, detail))?;
                if room.status != RoomStatus::Reviewing {
                    return Err(reject(
                        RejectReason::WrongState,
                        "only a reviewed round can be closed".to_string(),
                    ));
                }
                let Some(round) = next.round_state.take() else {
                    return Err(reject(
                        RejectReason::WrongState,
                        "only a reviewed round can be closed".to_string(),
                    ));
                };
                let pending = round.pending_validations();
                if pending > 0 && !force {
                    return Err(reject(
                        RejectReason::PendingValidations,
                        format!("{pending} answer(s) still waiting for a verdict"),
                    ));
                }

                next.completed_rounds
                    .push(RoundRecord::archive(room.current_round, round, at));

                if room.current_round >= room.settings.rounds_total {
                    next.status = RoomStatus::Finished;
                } else {
                    let prompt = non_blank_prompt(prompt).ok_or_else(|| {
                        reject(RejectReason::InvalidInput, "prompt is blank".to_string())
                    })?;
                    next.current_round += 1;
                    next.status = RoomStatus::Playing;
                    next.round_state = Some(RoundState::new(prompt, at));
                }
            }
            (Actor::Player(player_id), Action::Leave) => {
                let Some(player) = next.players.get_mut(player_id) else {
                    return Err(reject(
                        RejectReason::NotFound,
                        format!("player `{player_id}` is not in the room"),
                    ));
                };
                if !player.connected {
                    return Err(reject(
                        RejectReason::NotConnected,
                        format!("player `{player_id}` already left"),
                    ));
                }
                player.connected = false;
            }
            (Actor::System, action) => {
                return Err(reject(
                    RejectReason::InvalidInput,
                    format!("{} requires a player", action.kind()),
                ));
            }
        }

        Ok(next)
    }
}

fn require_admin(room: &RoomDocument, player_id: &PlayerId) -> Result<(), String> {
    if room.is_admin(player_id.as_str()) {
        Ok(())
    } else {
        Err(format!("player `{player_id}` is not the room admin"))
    }
}

fn non_blank_prompt(prompt: &str) -> Option<String> {
    let prompt = prompt.trim();
    (!prompt.is_empty()).then(|| prompt.to_string())
}
