//! Canonical room document: settings, roster, live round and archived rounds.
//!
//! Every value in here is plain data. Construction goes through
//! [`RoomDocument::new`] and decoding through [`RoomDocument::validate`], so a
//! document that violates an invariant is never handed to the rest of the crate.

use std::{
    borrow::Borrow,
    collections::HashSet,
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

const MAX_IDENTIFIER_LEN: usize = 128;

/// Wall-clock instant stored as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Build a timestamp from raw epoch milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time, truncated to milliseconds.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
            });
        Self(millis)
    }

    /// Epoch milliseconds.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Shift the timestamp forward, saturating at the representable maximum.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(delta))
    }

    /// Time elapsed since `earlier`, or zero when `earlier` is in the future.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        let delta = self.0.saturating_sub(earlier.0);
        Duration::from_millis(u64::try_from(delta).unwrap_or(0))
    }
}

/// Error raised when an identifier is not 1-128 characters of `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {kind} `{value}`: expected 1-{max} characters of [A-Za-z0-9_-]", max = MAX_IDENTIFIER_LEN)]
pub struct IdentifierError {
    /// Which identifier was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

fn is_well_formed_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate an identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self, IdentifierError> {
                let value = value.into();
                if is_well_formed_identifier(&value) {
                    Ok(Self(value))
                } else {
                    Err(IdentifierError { kind: $kind, value })
                }
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Stable identifier of a player, supplied by the identity collaborator.
    PlayerId,
    "player id"
);

identifier!(
    /// Globally unique identifier of a room.
    RoomId,
    "room id"
);

impl RoomId {
    /// Allocate a fresh random room identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

/// Language the round prompts are drawn for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    En,
    /// Spanish.
    Es,
    /// French.
    Fr,
    /// German.
    De,
}

impl Language {
    /// Every supported language, in display order.
    pub const ALL: [Language; 4] = [Language::En, Language::Es, Language::Fr, Language::De];

    /// ISO 639-1 code.
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
        }
    }

    /// Categories offered when a room is opened without its own list.
    pub fn default_categories(self) -> &'static [&'static str] {
        match self {
            Language::En => &["Name", "Surname", "Fruit", "Color", "Thing"],
            Language::Es => &["Nombre", "Apellido", "Fruta", "Color", "Cosa"],
            Language::Fr => &["Prénom", "Nom", "Fruit", "Couleur", "Objet"],
            Language::De => &["Vorname", "Nachname", "Obst", "Farbe", "Ding"],
        }
    }
}

/// Errors raised while validating room settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// A room needs at least one round.
    #[error("rounds_total must be at least 1")]
    NoRounds,
    /// A round needs at least one second on the clock.
    #[error("time_per_round_seconds must be at least 1")]
    NoTime,
    /// At least one category is required.
    #[error("at least one category is required")]
    NoCategories,
    /// A category is empty once trimmed.
    #[error("category #{0} is blank")]
    BlankCategory(usize),
    /// The same category appears twice (case-insensitive).
    #[error("category `{0}` is listed more than once")]
    DuplicateCategory(String),
    /// The admin identifier is malformed.
    #[error(transparent)]
    AdminId(#[from] IdentifierError),
    /// The admin display name is empty.
    #[error("admin display name must not be blank")]
    BlankAdminName,
}

/// Admin-configurable rules, before the admin identity is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRules {
    /// Number of rounds in the game.
    pub rounds_total: u32,
    /// Seconds each round lasts before the timer expires.
    pub time_per_round_seconds: u32,
    /// Ordered answer categories.
    pub categories: Vec<String>,
    /// Language used to draw prompts.
    pub language: Language,
    /// End the round as soon as the first player submits.
    pub end_round_on_first_submit: bool,
}

/// Validated room settings. Frozen once the room leaves the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomSettings {
    /// Number of rounds in the game.
    pub rounds_total: u32,
    /// Seconds each round lasts before the timer expires.
    pub time_per_round_seconds: u32,
    /// Ordered answer categories.
    pub categories: Vec<String>,
    /// Language used to draw prompts.
    pub language: Language,
    /// End the round as soon as the first player submits.
    pub end_round_on_first_submit: bool,
    /// The single player allowed to drive the room.
    pub admin_id: PlayerId,
}

impl RoomSettings {
    /// Attach an admin to a set of rules, trimming categories and validating the result.
    pub fn from_rules(rules: RoomRules, admin_id: &str) -> Result<Self, SettingsError> {
        let admin_id = PlayerId::parse(admin_id)?;
        let settings = Self {
            rounds_total: rules.rounds_total,
            time_per_round_seconds: rules.time_per_round_seconds,
            categories: rules
                .categories
                .into_iter()
                .map(|category| category.trim().to_string())
                .collect(),
            language: rules.language,
            end_round_on_first_submit: rules.end_round_on_first_submit,
            admin_id,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check the structural rules every stored settings value must satisfy.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.rounds_total < 1 {
            return Err(SettingsError::NoRounds);
        }
        if self.time_per_round_seconds < 1 {
            return Err(SettingsError::NoTime);
        }
        if self.categories.is_empty() {
            return Err(SettingsError::NoCategories);
        }

        let mut seen = HashSet::new();
        for (index, category) in self.categories.iter().enumerate() {
            if category.trim().is_empty() {
                return Err(SettingsError::BlankCategory(index));
            }
            if !seen.insert(category.to_lowercase()) {
                return Err(SettingsError::DuplicateCategory(category.clone()));
            }
        }

        Ok(())
    }

    /// Round duration as a [`Duration`].
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.time_per_round_seconds))
    }

    /// Whether `category` is one of the configured categories.
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|known| known == category)
    }
}

/// High-level lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Waiting for players; settings may still change.
    Lobby,
    /// A round is running and answers are accepted.
    Playing,
    /// The round is closed and the admin is validating answers.
    Reviewing,
    /// Terminal state; the document no longer changes.
    Finished,
}

impl RoomStatus {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Lobby => "lobby",
            RoomStatus::Playing => "playing",
            RoomStatus::Reviewing => "reviewing",
            RoomStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roster entry for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Player {
    /// Display name captured when the player joined.
    pub name: String,
    /// Accumulated score.
    pub score: u32,
    /// Mirrors `settings.admin_id == id`.
    pub is_admin: bool,
    /// When the player joined the room.
    pub joined_at: Timestamp,
    /// False once the player left the room view.
    pub connected: bool,
}

/// One submitted answer awaiting or having received validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Answer {
    /// Answer text as typed by the player.
    pub text: String,
    /// When the answer sheet was submitted.
    pub submitted_at: Timestamp,
    /// `None` until the admin validates it.
    #[serde(deserialize_with = "required_nullable")]
    pub validated: Option<bool>,
}

/// A player's answer sheet keyed by category.
pub type AnswerSheet = IndexMap<String, Answer>;

/// State of the round currently being played or reviewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoundState {
    /// Letter (or prompt) every answer must start with.
    pub prompt: String,
    /// When the round started.
    pub started_at: Timestamp,
    /// When the round stopped accepting answers.
    #[serde(deserialize_with = "required_nullable")]
    pub ended_at: Option<Timestamp>,
    /// Answer sheets keyed by player, in submission order.
    pub answers: IndexMap<PlayerId, AnswerSheet>,
}

impl RoundState {
    /// Fresh round with no submissions.
    pub fn new(prompt: String, started_at: Timestamp) -> Self {
        Self {
            prompt,
            started_at,
            ended_at: None,
            answers: IndexMap::new(),
        }
    }

    /// Number of answers still waiting for a verdict.
    pub fn pending_validations(&self) -> usize {
        self.answers
            .values()
            .flat_map(|sheet| sheet.values())
            .filter(|answer| answer.validated.is_none())
            .count()
    }
}

/// Answer as archived once its round closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchivedAnswer {
    /// Answer text as typed by the player.
    pub text: String,
    /// When the answer sheet was submitted.
    pub submitted_at: Timestamp,
    /// Final verdict; unvalidated answers are archived as incorrect.
    pub correct: bool,
}

/// Immutable record of a completed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoundRecord {
    /// 1-indexed round number.
    pub number: u32,
    /// Letter (or prompt) of the round.
    pub prompt: String,
    /// When the round started.
    pub started_at: Timestamp,
    /// When the round stopped accepting answers.
    pub ended_at: Timestamp,
    /// When the admin moved past the round.
    pub closed_at: Timestamp,
    /// Archived answer sheets keyed by player.
    pub answers: IndexMap<PlayerId, IndexMap<String, ArchivedAnswer>>,
}

impl RoundRecord {
    /// Freeze a reviewed round, resolving pending validations to `false`.
    pub fn archive(number: u32, round: RoundState, closed_at: Timestamp) -> Self {
        let ended_at = round.ended_at.unwrap_or(closed_at);
        let answers = round
            .answers
            .into_iter()
            .map(|(player_id, sheet)| {
                let sheet = sheet
                    .into_iter()
                    .map(|(category, answer)| {
                        (
                            category,
                            ArchivedAnswer {
                                text: answer.text,
                                submitted_at: answer.submitted_at,
                                correct: answer.validated.unwrap_or(false),
                            },
                        )
                    })
                    .collect();
                (player_id, sheet)
            })
            .collect();

        Self {
            number,
            prompt: round.prompt,
            started_at: round.started_at,
            ended_at,
            closed_at,
            answers,
        }
    }
}

/// Invariant violations detected on a room document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The embedded settings are invalid.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),
    /// Not exactly one player carries the admin flag.
    #[error("expected exactly one admin player, found {0}")]
    AdminCount(usize),
    /// The admin flag is set on someone other than `settings.admin_id`.
    #[error("admin flag does not match settings.admin_id `{0}`")]
    AdminMismatch(PlayerId),
    /// `current_round` is beyond `rounds_total`.
    #[error("current round {current} exceeds rounds total {total}")]
    RoundOutOfRange {
        /// Stored current round.
        current: u32,
        /// Configured total.
        total: u32,
    },
    /// Status and round fields disagree.
    #[error("{status} room is inconsistent: {detail}")]
    Inconsistent {
        /// Status of the offending document.
        status: RoomStatus,
        /// Which rule was broken.
        detail: &'static str,
    },
    /// An answer sheet references a category outside the settings.
    #[error("answer references unknown category `{0}`")]
    UnknownCategory(String),
    /// An answer sheet belongs to a player missing from the roster.
    #[error("answer references unknown player `{0}`")]
    UnknownPlayer(PlayerId),
    /// A write would move the document backwards.
    #[error("illegal successor document: {0}")]
    Regression(&'static str),
}

/// The single shared document describing a game room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomDocument {
    /// Identifier of the room.
    pub room_id: RoomId,
    /// Rules of the game.
    pub settings: RoomSettings,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Roster in join order.
    pub players: IndexMap<PlayerId, Player>,
    /// 0 before the first round, then 1-indexed.
    pub current_round: u32,
    /// Present while playing or reviewing.
    #[serde(deserialize_with = "required_nullable")]
    pub round_state: Option<RoundState>,
    /// Rounds that have been closed, oldest first.
    pub completed_rounds: Vec<RoundRecord>,
    /// When the room was created.
    pub created_at: Timestamp,
    /// Last accepted mutation, stamped by the store.
    pub updated_at: Timestamp,
    /// Optimistic-concurrency fence, bumped by the store on every write.
    pub version: u64,
}

impl RoomDocument {
    /// Build the initial lobby document with the admin as the only player.
    pub fn new(
        room_id: RoomId,
        settings: RoomSettings,
        admin_name: &str,
        now: Timestamp,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let admin_name = admin_name.trim();
        if admin_name.is_empty() {
            return Err(SettingsError::BlankAdminName);
        }

        let mut players = IndexMap::new();
        players.insert(
            settings.admin_id.clone(),
            Player {
                name: admin_name.to_string(),
                score: 0,
                is_admin: true,
                joined_at: now,
                connected: true,
            },
        );

        Ok(Self {
            room_id,
            settings,
            status: RoomStatus::Lobby,
            players,
            current_round: 0,
            round_state: None,
            completed_rounds: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Whether `player_id` is the room admin.
    pub fn is_admin(&self, player_id: &str) -> bool {
        self.settings.admin_id.as_str() == player_id
    }

    /// Look up a roster entry.
    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    /// Instant at which the running round times out.
    pub fn round_deadline(&self) -> Option<Timestamp> {
        match (&self.status, &self.round_state) {
            (RoomStatus::Playing, Some(round)) => Some(
                round
                    .started_at
                    .saturating_add(self.settings.round_duration()),
            ),
            _ => None,
        }
    }

    /// Time left in the running round, `None` when no round is running.
    pub fn time_remaining(&self, now: Timestamp) -> Option<Duration> {
        self.round_deadline()
            .map(|deadline| deadline.duration_since(now))
    }

    /// Prompts already drawn in this room, oldest first.
    pub fn used_prompts(&self) -> Vec<&str> {
        self.completed_rounds
            .iter()
            .map(|record| record.prompt.as_str())
            .chain(self.round_state.iter().map(|round| round.prompt.as_str()))
            .collect()
    }

    /// Check every structural invariant of the document.
    pub fn validate(&self) -> Result<(), DocumentError> {
        self.settings.validate()?;

        let admins: Vec<&PlayerId> = self
            .players
            .iter()
            .filter(|(_, player)| player.is_admin)
            .map(|(id, _)| id)
            .collect();
        if admins.len() != 1 {
            return Err(DocumentError::AdminCount(admins.len()));
        }
        if admins[0] != &self.settings.admin_id {
            return Err(DocumentError::AdminMismatch(self.settings.admin_id.clone()));
        }

        if self.current_round > self.settings.rounds_total {
            return Err(DocumentError::RoundOutOfRange {
                current: self.current_round,
                total: self.settings.rounds_total,
            });
        }

        let inconsistent = |detail| DocumentError::Inconsistent {
            status: self.status,
            detail,
        };
        let archived = self.completed_rounds.len();

        match self.status {
            RoomStatus::Lobby => {
                if self.current_round != 0 {
                    return Err(inconsistent("lobby rooms must be at round 0"));
                }
                if self.round_state.is_some() {
                    return Err(inconsistent("lobby rooms carry no round state"));
                }
                if archived != 0 {
                    return Err(inconsistent("lobby rooms have no completed rounds"));
                }
            }
            RoomStatus::Playing | RoomStatus::Reviewing => {
                if self.current_round == 0 {
                    return Err(inconsistent("a live round is numbered from 1"));
                }
                let Some(round) = &self.round_state else {
                    return Err(inconsistent("a live round requires round state"));
                };
                if archived as u64 + 1 != u64::from(self.current_round) {
                    return Err(inconsistent("completed rounds must precede the live round"));
                }
                match (self.status, round.ended_at) {
                    (RoomStatus::Playing, Some(_)) => {
                        return Err(inconsistent("a playing round has not ended"));
                    }
                    (RoomStatus::Reviewing, None) => {
                        return Err(inconsistent("a reviewed round has an end time"));
                    }
                    _ => {}
                }
                for (player_id, sheet) in &round.answers {
                    if !self.players.contains_key(player_id) {
                        return Err(DocumentError::UnknownPlayer(player_id.clone()));
                    }
                    if let Some(category) = sheet
                        .keys()
                        .find(|category| !self.settings.has_category(category))
                    {
                        return Err(DocumentError::UnknownCategory(category.clone()));
                    }
                }
            }
            RoomStatus::Finished => {
                if self.current_round != self.settings.rounds_total {
                    return Err(inconsistent("finished rooms played every round"));
                }
                if self.round_state.is_some() {
                    return Err(inconsistent("finished rooms carry no round state"));
                }
                if archived as u64 != u64::from(self.settings.rounds_total) {
                    return Err(inconsistent("finished rooms archive every round"));
                }
            }
        }

        for record in &self.completed_rounds {
            for (player_id, sheet) in &record.answers {
                if !self.players.contains_key(player_id) {
                    return Err(DocumentError::UnknownPlayer(player_id.clone()));
                }
                if let Some(category) = sheet
                    .keys()
                    .find(|category| !self.settings.has_category(category))
                {
                    return Err(DocumentError::UnknownCategory(category.clone()));
                }
            }
        }

        Ok(())
    }

    /// Check that `next` may replace `self` in the store.
    pub fn verify_successor(&self, next: &RoomDocument) -> Result<(), DocumentError> {
        if self.status == RoomStatus::Finished {
            return Err(DocumentError::Regression("finished rooms are immutable"));
        }
        if next.room_id != self.room_id {
            return Err(DocumentError::Regression("room id changed"));
        }
        if next.version <= self.version {
            return Err(DocumentError::Regression("version did not advance"));
        }
        if next.updated_at < self.updated_at {
            return Err(DocumentError::Regression("updated_at moved backwards"));
        }
        if next.current_round < self.current_round {
            return Err(DocumentError::Regression("current round decreased"));
        }
        if next.status == RoomStatus::Lobby && self.status != RoomStatus::Lobby {
            return Err(DocumentError::Regression("rooms never return to the lobby"));
        }
        if self.status != RoomStatus::Lobby && next.settings != self.settings {
            return Err(DocumentError::Regression("settings are frozen after the lobby"));
        }
        if self
            .players
            .keys()
            .any(|player_id| !next.players.contains_key(player_id))
        {
            return Err(DocumentError::Regression("players are never removed"));
        }
        if next.status != RoomStatus::Lobby && next.players.len() != self.players.len() {
            return Err(DocumentError::Regression("players only join in the lobby"));
        }
        next.validate()
    }
}

/// Deserialize an `Option` without serde's implicit "missing means `None`".
fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RoomRules {
        RoomRules {
            rounds_total: 3,
            time_per_round_seconds: 60,
            categories: vec!["Animal".into(), " City ".into(), "Food".into()],
            language: Language::En,
            end_round_on_first_submit: false,
        }
    }

    fn lobby() -> RoomDocument {
        let settings = RoomSettings::from_rules(rules(), "admin").unwrap();
        RoomDocument::new(
            RoomId::parse("room-1").unwrap(),
            settings,
            "Ada",
            Timestamp::from_millis(1_000),
        )
        .unwrap()
    }

    #[test]
    fn new_room_starts_in_lobby_with_only_the_admin() {
        let room = lobby();
        assert_eq!(room.status, RoomStatus::Lobby);
        assert_eq!(room.current_round, 0);
        assert_eq!(room.players.len(), 1);
        let admin = room.player("admin").unwrap();
        assert!(admin.is_admin);
        assert_eq!(admin.score, 0);
        assert!(room.round_state.is_none());
        assert_eq!(room.settings.categories[1], "City");
        room.validate().unwrap();
    }

    #[test]
    fn settings_reject_bad_values() {
        let mut bad = rules();
        bad.rounds_total = 0;
        assert_eq!(
            RoomSettings::from_rules(bad, "admin"),
            Err(SettingsError::NoRounds)
        );

        let mut bad = rules();
        bad.time_per_round_seconds = 0;
        assert_eq!(
            RoomSettings::from_rules(bad, "admin"),
            Err(SettingsError::NoTime)
        );

        let mut bad = rules();
        bad.categories.clear();
        assert_eq!(
            RoomSettings::from_rules(bad, "admin"),
            Err(SettingsError::NoCategories)
        );

        let mut bad = rules();
        bad.categories.push("   ".into());
        assert_eq!(
            RoomSettings::from_rules(bad, "admin"),
            Err(SettingsError::BlankCategory(3))
        );

        let mut bad = rules();
        bad.categories.push("animal".into());
        assert_eq!(
            RoomSettings::from_rules(bad, "admin"),
            Err(SettingsError::DuplicateCategory("animal".into()))
        );

        assert!(matches!(
            RoomSettings::from_rules(rules(), "not an id"),
            Err(SettingsError::AdminId(_))
        ));
    }

    #[test]
    fn identifiers_are_restricted() {
        assert!(PlayerId::parse("user_42-x").is_ok());
        assert!(PlayerId::parse("").is_err());
        assert!(PlayerId::parse("a/b").is_err());
        assert!(PlayerId::parse("x".repeat(129)).is_err());
        assert_eq!(RoomId::generate().as_str().len(), 32);
    }

    #[test]
    fn serialization_round_trips_structurally() {
        let room = lobby();
        let json = serde_json::to_value(&room).unwrap();
        let decoded: RoomDocument = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, room);
    }

    #[test]
    fn missing_nullable_field_is_rejected() {
        let mut json = serde_json::to_value(lobby()).unwrap();
        json.as_object_mut().unwrap().remove("round_state");
        assert!(serde_json::from_value::<RoomDocument>(json).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut json = serde_json::to_value(lobby()).unwrap();
        json.as_object_mut()
            .unwrap()
            .insert("extra".into(), serde_json::Value::Bool(true));
        assert!(serde_json::from_value::<RoomDocument>(json).is_err());
    }

    #[test]
    fn validate_detects_second_admin() {
        let mut room = lobby();
        room.players.insert(
            PlayerId::parse("mallory").unwrap(),
            Player {
                name: "Mallory".into(),
                score: 0,
                is_admin: true,
                joined_at: Timestamp::from_millis(2_000),
                connected: true,
            },
        );
        assert_eq!(room.validate(), Err(DocumentError::AdminCount(2)));
    }

    #[test]
    fn validate_detects_round_state_in_lobby() {
        let mut room = lobby();
        room.round_state = Some(RoundState::new("A".into(), Timestamp::from_millis(5)));
        assert!(matches!(
            room.validate(),
            Err(DocumentError::Inconsistent {
                status: RoomStatus::Lobby,
                ..
            })
        ));
    }

    #[test]
    fn successor_cannot_remove_players_or_rewind() {
        let room = lobby();
        let mut next = room.clone();
        next.version = 1;
        next.players.clear();
        assert_eq!(
            room.verify_successor(&next),
            Err(DocumentError::Regression("players are never removed"))
        );

        let mut stale = room.clone();
        stale.version = 0;
        assert_eq!(
            room.verify_successor(&stale),
            Err(DocumentError::Regression("version did not advance"))
        );
    }

    #[test]
    fn archive_resolves_pending_answers_to_incorrect() {
        let mut round = RoundState::new("B".into(), Timestamp::from_millis(0));
        round.ended_at = Some(Timestamp::from_millis(30_000));
        let mut sheet = AnswerSheet::new();
        sheet.insert(
            "Animal".into(),
            Answer {
                text: "Bear".into(),
                submitted_at: Timestamp::from_millis(20_000),
                validated: None,
            },
        );
        round.answers.insert(PlayerId::parse("p1").unwrap(), sheet);

        let record = RoundRecord::archive(1, round, Timestamp::from_millis(40_000));
        assert!(!record.answers["p1"]["Animal"].correct);
        assert_eq!(record.ended_at, Timestamp::from_millis(30_000));
        assert_eq!(record.closed_at, Timestamp::from_millis(40_000));
    }

    #[test]
    fn time_remaining_counts_down_while_playing() {
        let mut room = lobby();
        room.status = RoomStatus::Playing;
        room.current_round = 1;
        room.round_state = Some(RoundState::new("C".into(), Timestamp::from_millis(10_000)));
        assert_eq!(
            room.time_remaining(Timestamp::from_millis(25_000)),
            Some(Duration::from_secs(45))
        );
        assert_eq!(
            room.time_remaining(Timestamp::from_millis(100_000)),
            Some(Duration::ZERO)
        );
    }
}
