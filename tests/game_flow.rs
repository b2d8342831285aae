//! Whole games played through engines and through the service layer.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use word_rooms_back::{
    clock::{Clock, ManualClock, TokioClock},
    config::AppConfig,
    dao::room_store::{RoomStore, memory::InMemoryRoomStore},
    dto::{
        caller::Caller,
        room::{AdvanceRoundRequest, CreateRoomRequest, RulesInput, ValidateAnswerRequest},
    },
    error::ServiceError,
    services::room_service,
    state::{
        AppState,
        prompts::FixedPrompts,
        room::{Language, PlayerId, RoomDocument, RoomId, RoomRules, RoomStatus, Timestamp},
        state_machine::RejectReason,
        stats::{self, StatsError},
    },
    sync::{
        Connection, Intent, StaticIdentity, SyncEngine, SyncEngineBuilder, SyncError, SyncOptions,
    },
};

fn pid(id: &str) -> PlayerId {
    PlayerId::parse(id).unwrap()
}

fn engine(
    store: &Arc<dyn RoomStore>,
    clock: &Arc<dyn Clock>,
    identity: StaticIdentity,
    timer: bool,
) -> SyncEngineBuilder {
    SyncEngineBuilder::new(store.clone(), Arc::new(identity))
        .clock(clock.clone())
        .prompts(Arc::new(FixedPrompts::new(["L", "M"])))
        .options(SyncOptions {
            dispatch_timeout: Duration::from_secs(5),
            run_round_timer: timer,
        })
}

fn player(id: &str, name: &str) -> StaticIdentity {
    StaticIdentity::signed_in(pid(id), name)
}

fn sheet(pairs: &[(&str, &str)]) -> Intent {
    Intent::SubmitAnswers(
        pairs
            .iter()
            .map(|(category, text)| (category.to_string(), text.to_string()))
            .collect::<IndexMap<_, _>>(),
    )
}

fn verdict(player_id: &str, category: &str, valid: bool) -> Intent {
    Intent::ValidateAnswer {
        player_id: pid(player_id),
        category: category.to_string(),
        valid,
    }
}

fn rejection_reason(result: Result<Arc<RoomDocument>, SyncError>) -> RejectReason {
    match result {
        Err(SyncError::Rejected(rejection)) => rejection.reason,
        other => panic!("expected a rejection, got {other:?}"),
    }
}

async fn wait_for_review(host: &SyncEngine, round: u32) -> Arc<RoomDocument> {
    host.observer()
        .wait_for(|view| {
            view.document.as_ref().is_some_and(|room| {
                room.status == RoomStatus::Reviewing && room.current_round == round
            })
        })
        .await
        .unwrap()
        .document
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn three_players_play_two_timed_rounds_to_the_end() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(Timestamp::from_millis(0)));
    let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::with_clock(clock.clone()));
    let rules = RoomRules {
        rounds_total: 2,
        time_per_round_seconds: 60,
        categories: vec!["Animal".into(), "Fruit".into()],
        language: Language::En,
        end_round_on_first_submit: false,
    };

    let ana = engine(&store, &clock, player("p1", "Ana"), false)
        .create(Some(RoomId::parse("party").unwrap()), rules)
        .await
        .unwrap();
    let room_id = ana.room_id().clone();
    let ben = engine(&store, &clock, player("p2", "Ben"), false).build(room_id.clone());
    let cleo = engine(&store, &clock, player("p3", "Cleo"), false).build(room_id.clone());
    ben.dispatch(Intent::Join).await.unwrap();
    cleo.dispatch(Intent::Join).await.unwrap();

    let host = engine(&store, &clock, StaticIdentity::anonymous(), true).build(room_id.clone());
    host.observe().await;

    // round 1
    ana.refresh().await;
    let room = ana.dispatch(Intent::StartGame).await.unwrap();
    assert_eq!(room.status, RoomStatus::Playing);
    assert_eq!(room.round_state.as_ref().unwrap().prompt, "L");

    tokio::time::advance(Duration::from_secs(10)).await;
    ana.dispatch(sheet(&[("Animal", "Lion"), ("Fruit", "Lemon")]))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    ben.refresh().await;
    let room = ben
        .dispatch(sheet(&[("Animal", "Llama"), ("Fruit", "  ")]))
        .await
        .unwrap();
    assert_eq!(room.round_state.as_ref().unwrap().answers["p2"].len(), 1);
    assert_eq!(
        rejection_reason(ben.dispatch(sheet(&[("Animal", "Lynx")])).await),
        RejectReason::AlreadySubmitted
    );

    wait_for_review(&host, 1).await;
    ana.refresh().await;
    ben.refresh().await;
    assert_eq!(
        rejection_reason(ben.dispatch(verdict("p1", "Animal", true)).await),
        RejectReason::NotAdmin
    );
    ana.dispatch(verdict("p1", "Animal", true)).await.unwrap();
    ana.dispatch(verdict("p1", "Fruit", true)).await.unwrap();
    let room = ana.dispatch(verdict("p2", "Animal", true)).await.unwrap();
    assert_eq!(
        rejection_reason(ana.dispatch(verdict("p2", "Animal", false)).await),
        RejectReason::AlreadyValidated
    );

    let summary = stats::current_round_summary(&room).unwrap();
    assert_eq!(summary.number, 1);
    assert_eq!(summary.pending_validations, 0);
    let points: Vec<u32> = summary.scores.iter().map(|score| score.points).collect();
    assert_eq!(points, vec![10, 5, 0]);

    // round 2
    let room = ana
        .dispatch(Intent::AdvanceRound { force: false })
        .await
        .unwrap();
    assert_eq!(room.current_round, 2);
    assert_eq!(room.round_state.as_ref().unwrap().prompt, "M");

    tokio::time::advance(Duration::from_secs(5)).await;
    cleo.refresh().await;
    cleo.dispatch(sheet(&[("Animal", "Moose")])).await.unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;
    ana.dispatch(sheet(&[("Animal", "Mole")])).await.unwrap();

    wait_for_review(&host, 2).await;
    ana.refresh().await;
    ana.dispatch(verdict("p3", "Animal", true)).await.unwrap();
    assert_eq!(
        rejection_reason(ana.dispatch(Intent::AdvanceRound { force: false }).await),
        RejectReason::PendingValidations
    );
    let finished = ana
        .dispatch(Intent::AdvanceRound { force: true })
        .await
        .unwrap();
    assert_eq!(finished.status, RoomStatus::Finished);
    assert_eq!(
        rejection_reason(cleo.dispatch(Intent::Leave).await),
        RejectReason::WrongState
    );

    let report = stats::aggregate(&finished).unwrap();
    let ranking: Vec<(&str, usize, u32)> = report
        .ranking
        .iter()
        .map(|entry| (entry.player_id.as_str(), entry.position, entry.score))
        .collect();
    assert_eq!(ranking, vec![("p1", 1, 10), ("p2", 2, 5), ("p3", 3, 5)]);
    assert_eq!(report.max_score, 10);
    assert_eq!(report.min_score, 5);
    assert_eq!(report.average_score, 6.67);
    assert_eq!(report.total_rounds, 2);
    assert!(report.total_time_elapsed >= Duration::from_secs(120));

    let ana_stats = &report.players[0];
    assert_eq!(ana_stats.correct_answers, 2);
    assert_eq!(ana_stats.submitted_answers, 3);
    assert_eq!(ana_stats.accuracy, 0.67);
    assert_eq!(ana_stats.time_taken, Duration::from_secs(18));
    assert_eq!(report.players[1].time_taken, Duration::from_secs(20));
    assert_eq!(report.players[2].time_taken, Duration::from_secs(5));
    assert_eq!(stats::aggregate(&finished).unwrap(), report);
}

fn service_state() -> (Arc<AppState>, InMemoryRoomStore) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
    let store = InMemoryRoomStore::with_clock(clock.clone());
    let state = AppState::with_parts(
        Arc::new(AppConfig::default()),
        clock,
        Arc::new(FixedPrompts::new(["A", "B"])),
    );
    (state, store)
}

fn caller(id: &str, name: &str) -> Caller {
    Caller::new(Some(pid(id)), name)
}

fn rules_input(rounds_total: u32) -> RulesInput {
    RulesInput {
        rounds_total,
        time_per_round_seconds: 60,
        categories: Some(vec!["Animal".into(), "City".into()]),
        language: Language::En,
        end_round_on_first_submit: false,
    }
}

#[tokio::test]
async fn requests_are_refused_while_degraded() {
    let (state, _) = service_state();
    let request = CreateRoomRequest {
        room_id: None,
        rules: rules_input(1),
    };
    let err = room_service::create_room(&state, caller("p1", "Ana"), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Degraded));
    assert!(state.is_degraded().await);
}

#[tokio::test]
async fn service_layer_hides_running_answers_and_reports_results() {
    let (state, store) = service_state();
    state.set_room_store(Arc::new(store.clone())).await;
    assert!(!state.is_degraded().await);

    let created = room_service::create_room(
        &state,
        caller("p1", "Ana"),
        CreateRoomRequest {
            room_id: Some("lounge".into()),
            rules: rules_input(1),
        },
    )
    .await
    .unwrap();
    assert_eq!(created.room_id, "lounge");
    assert_eq!(created.version, 1);
    assert!(created.is_admin);
    assert_eq!(created.connection, Connection::Live);
    assert_eq!(state.hosted_rooms(), 1);

    let room_id = room_service::parse_room_id("lounge").unwrap();
    room_service::join(&state, caller("p2", "Ben"), &room_id)
        .await
        .unwrap();
    let err = room_service::start_game(&state, caller("p2", "Ben"), &room_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Sync(SyncError::Rejected(ref rejection)) if rejection.reason == RejectReason::NotAdmin
    ));

    let started = room_service::start_game(&state, caller("p1", "Ana"), &room_id)
        .await
        .unwrap();
    assert_eq!(started.status, RoomStatus::Playing);
    assert_eq!(started.time_remaining_ms, Some(60_000));

    let answers: IndexMap<String, String> =
        [("Animal".to_string(), "Ant".to_string())].into_iter().collect();
    room_service::submit_answers(&state, caller("p2", "Ben"), &room_id, answers)
        .await
        .unwrap();

    let seen_by_admin = room_service::get_room(&state, &caller("p1", "Ana"), &room_id)
        .await
        .unwrap();
    let round = seen_by_admin.round.unwrap();
    assert_eq!(round.submitted, vec!["p2".to_string()]);
    assert!(round.answers.is_empty());

    let seen_by_owner = room_service::get_room(&state, &caller("p2", "Ben"), &room_id)
        .await
        .unwrap();
    assert_eq!(seen_by_owner.round.unwrap().answers["p2"]["Animal"].text, "Ant");
    assert!(!seen_by_owner.is_admin);

    let err = room_service::final_stats(&state, &room_id).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Stats(StatsError::NotFinished(RoomStatus::Playing))
    ));

    let bad_verdict = ValidateAnswerRequest {
        player_id: "not a player".into(),
        category: "Animal".into(),
        valid: true,
    };
    let err = room_service::validate_answer(&state, caller("p1", "Ana"), &room_id, bad_verdict)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let missing = room_service::parse_room_id("nowhere").unwrap();
    let err = room_service::get_room(&state, &caller("p1", "Ana"), &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Sync(SyncError::NotFound(_))));
    assert_eq!(state.hosted_rooms(), 1);

    let err = room_service::advance_round(
        &state,
        caller("p1", "Ana"),
        &room_id,
        AdvanceRoundRequest { force: true },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Sync(SyncError::Rejected(ref rejection)) if rejection.reason == RejectReason::WrongState
    ));
}

#[tokio::test]
async fn abandoned_and_finished_rooms_stop_being_hosted() {
    let (state, store) = service_state();
    state.set_room_store(Arc::new(store.clone())).await;

    for _ in 0..20 {
        let created = room_service::create_room(
            &state,
            caller("p1", "Ana"),
            CreateRoomRequest {
                room_id: None,
                rules: rules_input(1),
            },
        )
        .await
        .unwrap();
        let room_id = room_service::parse_room_id(&created.room_id).unwrap();
        room_service::leave(&state, caller("p1", "Ana"), &room_id)
            .await
            .unwrap();
    }
    assert_eq!(state.hosted_rooms(), 0);
    assert_eq!(store.len(), 20);

    let quick = RulesInput {
        end_round_on_first_submit: true,
        ..rules_input(1)
    };
    room_service::create_room(
        &state,
        caller("p1", "Ana"),
        CreateRoomRequest {
            room_id: Some("sprint".into()),
            rules: quick,
        },
    )
    .await
    .unwrap();
    let room_id = room_service::parse_room_id("sprint").unwrap();
    room_service::join(&state, caller("p2", "Ben"), &room_id)
        .await
        .unwrap();
    room_service::start_game(&state, caller("p1", "Ana"), &room_id)
        .await
        .unwrap();
    assert_eq!(state.hosted_rooms(), 1);

    let answers: IndexMap<String, String> =
        [("Animal".to_string(), "Ant".to_string())].into_iter().collect();
    let reviewed = room_service::submit_answers(&state, caller("p2", "Ben"), &room_id, answers)
        .await
        .unwrap();
    assert_eq!(reviewed.status, RoomStatus::Reviewing);

    let finished = room_service::advance_round(
        &state,
        caller("p1", "Ana"),
        &room_id,
        AdvanceRoundRequest { force: true },
    )
    .await
    .unwrap();
    assert_eq!(finished.status, RoomStatus::Finished);
    assert_eq!(state.hosted_rooms(), 0);

    let report = room_service::final_stats(&state, &room_id).await.unwrap();
    assert_eq!(report.players.len(), 2);
    assert_eq!(state.hosted_rooms(), 0);
}
