//! Derived statistics over finished rooms and reviewed rounds.

use std::time::Duration;

use serde::Serialize;
use serde_with::DurationMilliSeconds;
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::{
    room::{PlayerId, RoomDocument, RoomStatus, RoundRecord},
    state_machine::POINTS_PER_CORRECT_ANSWER,
};

/// Error returned when statistics are requested too early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    /// Final statistics only exist once the room is finished.
    #[error("room is {0}, final statistics need a finished room")]
    NotFinished(RoomStatus),
    /// Round summaries only exist while reviewing.
    #[error("room is {0}, no round is under review")]
    NotReviewing(RoomStatus),
}

/// One line of the final ranking.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RankingEntry {
    /// 1-based position in the ranking.
    pub position: usize,
    /// Player the line belongs to.
    #[schema(value_type = String)]
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Final score.
    pub score: u32,
}

/// Per-player performance over the whole game.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlayerStats {
    /// Player the line belongs to.
    #[schema(value_type = String)]
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Answers judged correct.
    pub correct_answers: u32,
    /// Non-blank answers handed in.
    pub submitted_answers: u32,
    /// `correct / submitted` rounded to 2 decimals, 0 when nothing was submitted.
    pub accuracy: f64,
    /// Sum over rounds of the delay between round start and submission.
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    #[schema(value_type = u64)]
    pub time_taken: Duration,
}

/// Final statistics of a finished room.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StatsReport {
    /// Players by descending score, ties broken by join order.
    pub ranking: Vec<RankingEntry>,
    /// Highest final score.
    pub max_score: u32,
    /// Lowest final score.
    pub min_score: u32,
    /// Mean final score rounded to 2 decimals.
    pub average_score: f64,
    /// Number of rounds played.
    pub total_rounds: u32,
    /// From the start of the first round to the close of the last one.
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    #[schema(value_type = u64)]
    pub total_time_elapsed: Duration,
    /// Per-player breakdown in join order.
    pub players: Vec<PlayerStats>,
}

/// A player's result in one round.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RoundScore {
    /// Player the line belongs to.
    #[schema(value_type = String)]
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Answers handed in this round.
    pub submitted: u32,
    /// Answers judged correct this round.
    pub correct: u32,
    /// Points earned this round.
    pub points: u32,
}

/// End-of-round summary.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RoundSummary {
    /// 1-based round number.
    pub number: u32,
    /// Letter of the round.
    pub prompt: String,
    /// Players that handed in a sheet.
    pub submissions: usize,
    /// Answers still waiting for a verdict.
    pub pending_validations: usize,
    /// Per-player results in join order.
    pub scores: Vec<RoundScore>,
}

/// Compute the final statistics of a finished room.
///
/// Pure and deterministic: the same document always yields an identical report.
pub fn aggregate(room: &RoomDocument) -> Result<StatsReport, StatsError> {
    if room.status != RoomStatus::Finished {
        return Err(StatsError::NotFinished(room.status));
    }

    let mut ordered: Vec<(usize, &PlayerId, u32)> = room
        .players
        .iter()
        .enumerate()
        .map(|(join_order, (player_id, player))| (join_order, player_id, player.score))
        .collect();
    // stable sort keeps join order among equal scores
    ordered.sort_by(|a, b| b.2.cmp(&a.2));

    let ranking: Vec<RankingEntry> = ordered
        .iter()
        .enumerate()
        .map(|(index, (_, player_id, score))| RankingEntry {
            position: index + 1,
            player_id: (*player_id).clone(),
            name: room.players[*player_id].name.clone(),
            score: *score,
        })
        .collect();

    let scores = room.players.values().map(|player| player.score);
    let max_score = scores.clone().max().unwrap_or(0);
    let min_score = scores.clone().min().unwrap_or(0);
    let total: u64 = scores.map(u64::from).sum();
    let average_score = if room.players.is_empty() {
        0.0
    } else {
        round_to_hundredths(total as f64 / room.players.len() as f64)
    };

    let total_time_elapsed = match (room.completed_rounds.first(), room.completed_rounds.last()) {
        (Some(first), Some(last)) => last.closed_at.duration_since(first.started_at),
        _ => Duration::ZERO,
    };

    let players = room
        .players
        .iter()
        .map(|(player_id, player)| {
            let mut correct_answers = 0;
            let mut submitted_answers = 0;
            let mut time_taken = Duration::ZERO;

            for record in &room.completed_rounds {
                let Some(sheet) = record.answers.get(player_id) else {
                    continue;
                };
                submitted_answers += sheet.len() as u32;
                correct_answers += sheet.values().filter(|answer| answer.correct).count() as u32;
                if let Some(submitted_at) = sheet.values().map(|answer| answer.submitted_at).min() {
                    time_taken += submitted_at.duration_since(record.started_at);
                }
            }

            PlayerStats {
                player_id: player_id.clone(),
                name: player.name.clone(),
                correct_answers,
                submitted_answers,
                accuracy: ratio(correct_answers, submitted_answers),
                time_taken,
            }
        })
        .collect();

    Ok(StatsReport {
        ranking,
        max_score,
        min_score,
        average_score,
        total_rounds: room.completed_rounds.len() as u32,
        total_time_elapsed,
        players,
    })
}

/// Summarise an archived round.
pub fn round_summary(room: &RoomDocument, record: &RoundRecord) -> RoundSummary {
    let scores = room
        .players
        .iter()
        .map(|(player_id, player)| {
            let (submitted, correct) = record
                .answers
                .get(player_id)
                .map(|sheet| {
                    (
                        sheet.len() as u32,
                        sheet.values().filter(|answer| answer.correct).count() as u32,
                    )
                })
                .unwrap_or((0, 0));
            RoundScore {
                player_id: player_id.clone(),
                name: player.name.clone(),
                submitted,
                correct,
                points: correct * POINTS_PER_CORRECT_ANSWER,
            }
        })
        .collect();

    RoundSummary {
        number: record.number,
        prompt: record.prompt.clone(),
        submissions: record.answers.len(),
        pending_validations: 0,
        scores,
    }
}

/// Summarise the round currently under review.
pub fn current_round_summary(room: &RoomDocument) -> Result<RoundSummary, StatsError> {
    let round = match (&room.status, &room.round_state) {
        (RoomStatus::Reviewing, Some(round)) => round,
        _ => return Err(StatsError::NotReviewing(room.status)),
    };

    let scores = room
        .players
        .iter()
        .map(|(player_id, player)| {
            let (submitted, correct) = round
                .answers
                .get(player_id)
                .map(|sheet| {
                    (
                        sheet.len() as u32,
                        sheet
                            .values()
                            .filter(|answer| answer.validated == Some(true))
                            .count() as u32,
                    )
                })
                .unwrap_or((0, 0));
            RoundScore {
                player_id: player_id.clone(),
                name: player.name.clone(),
                submitted,
                correct,
                points: correct * POINTS_PER_CORRECT_ANSWER,
            }
        })
        .collect();

    Ok(RoundSummary {
        number: room.current_round,
        prompt: round.prompt.clone(),
        submissions: round.answers.len(),
        pending_validations: round.pending_validations(),
        scores,
    })
}

fn ratio(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to_hundredths(f64::from(part) / f64::from(whole))
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::state::{
        room::{Language, RoomId, RoomRules, RoomSettings, Timestamp},
        state_machine::{Action, Command, RoomStateMachine},
    };

    const CATEGORIES: [&str; 4] = ["Animal", "City", "Food", "Name"];

    fn pid(id: &str) -> PlayerId {
        PlayerId::parse(id).unwrap()
    }

    fn run(
        sm: &RoomStateMachine,
        room: RoomDocument,
        actor: Option<&str>,
        action: Action,
        at: i64,
    ) -> RoomDocument {
        let at = Timestamp::from_millis(at);
        let command = match actor {
            Some(player) => Command::by_player(pid(player), action, at),
            None => Command::by_system(action, at),
        };
        sm.apply(&room, &command).unwrap()
    }

    fn play_round(
        sm: &RoomStateMachine,
        mut room: RoomDocument,
        start: i64,
        correct: &[(&str, usize)],
    ) -> RoomDocument {
        for (offset, (player, _)) in correct.iter().enumerate() {
            let answers: IndexMap<String, String> = CATEGORIES
                .iter()
                .map(|category| (category.to_string(), format!("{category} answer")))
                .collect();
            room = run(
                sm,
                room,
                Some(player),
                Action::SubmitAnswers { answers },
                start + 1_000 * (offset as i64 + 1),
            );
        }
        room = run(sm, room, None, Action::TimerExpired, start + 60_000);
        for (player, count) in correct {
            for (index, category) in CATEGORIES.iter().enumerate() {
                room = run(
                    sm,
                    room,
                    Some("p1"),
                    Action::ValidateAnswer {
                        player_id: pid(player),
                        category: category.to_string(),
                        valid: index < *count,
                    },
                    start + 61_000,
                );
            }
        }
        run(
            sm,
            room,
            Some("p1"),
            Action::AdvanceRound {
                force: false,
                prompt: "T".into(),
            },
            start + 62_000,
        )
    }

    fn finished_room() -> RoomDocument {
        let sm = RoomStateMachine::new();
        let settings = RoomSettings::from_rules(
            RoomRules {
                rounds_total: 2,
                time_per_round_seconds: 60,
                categories: CATEGORIES.iter().map(|c| c.to_string()).collect(),
                language: Language::Es,
                end_round_on_first_submit: false,
            },
            "p1",
        )
        .unwrap();
        let room = RoomDocument::new(
            RoomId::parse("stats").unwrap(),
            settings,
            "Pia",
            Timestamp::from_millis(0),
        )
        .unwrap();
        let room = run(&sm, room, Some("p2"), Action::Join { name: "Pau".into() }, 100);
        let room = run(&sm, room, Some("p3"), Action::Join { name: "Pol".into() }, 200);
        let room = run(&sm, room, Some("p1"), Action::StartGame { prompt: "S".into() }, 1_000);

        // round 1: 10 / 10 / 20
        let room = play_round(&sm, room, 1_000, &[("p1", 2), ("p2", 2), ("p3", 4)]);
        // round 2: 5 / 15 / 5
        play_round(&sm, room, 63_000, &[("p1", 1), ("p2", 3), ("p3", 1)])
    }

    #[test]
    fn ranking_breaks_ties_by_join_order() {
        let room = finished_room();
        assert_eq!(room.status, RoomStatus::Finished);

        let report = aggregate(&room).unwrap();
        let ranking: Vec<(&str, u32)> = report
            .ranking
            .iter()
            .map(|entry| (entry.player_id.as_str(), entry.score))
            .collect();
        assert_eq!(ranking, [("p2", 25), ("p3", 25), ("p1", 15)]);
        assert_eq!(report.max_score, 25);
        assert_eq!(report.min_score, 15);
        assert_eq!(report.average_score, 21.67);
        assert_eq!(report.total_rounds, 2);
        assert_eq!(report.total_time_elapsed, Duration::from_millis(124_000));
    }

    #[test]
    fn per_player_breakdown_counts_answers_and_time() {
        let report = aggregate(&finished_room()).unwrap();
        let p2 = &report.players[1];
        assert_eq!(p2.player_id.as_str(), "p2");
        assert_eq!(p2.submitted_answers, 8);
        assert_eq!(p2.correct_answers, 5);
        assert_eq!(p2.accuracy, 0.63);
        assert_eq!(p2.time_taken, Duration::from_millis(4_000));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let room = finished_room();
        let first = serde_json::to_string(&aggregate(&room).unwrap()).unwrap();
        let second = serde_json::to_string(&aggregate(&room).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unfinished_room_has_no_final_stats() {
        let settings = RoomSettings::from_rules(
            RoomRules {
                rounds_total: 1,
                time_per_round_seconds: 10,
                categories: vec!["Animal".into()],
                language: Language::En,
                end_round_on_first_submit: false,
            },
            "p1",
        )
        .unwrap();
        let room = RoomDocument::new(
            RoomId::parse("lobby").unwrap(),
            settings,
            "Pia",
            Timestamp::from_millis(0),
        )
        .unwrap();
        assert_eq!(aggregate(&room), Err(StatsError::NotFinished(RoomStatus::Lobby)));
        assert_eq!(
            current_round_summary(&room),
            Err(StatsError::NotReviewing(RoomStatus::Lobby))
        );
    }

    #[test]
    fn archived_round_summary_reports_points() {
        let room = finished_room();
        let summary = round_summary(&room, &room.completed_rounds[0]);
        assert_eq!(summary.number, 1);
        assert_eq!(summary.submissions, 3);
        let points: Vec<u32> = summary.scores.iter().map(|score| score.points).collect();
        assert_eq!(points, [10, 10, 20]);
    }
}
