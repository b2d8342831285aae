use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use indexmap::IndexMap;
use tokio::{
    sync::{Mutex as AsyncMutex, broadcast::error::RecvError, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    dao::{
        hub::{RoomEvent, RoomSubscription},
        room_store::RoomStore,
        storage::StoreError,
    },
    state::{
        prompts::{AlphabetPrompts, PromptSource},
        room::{PlayerId, RoomDocument, RoomId, RoomRules, RoomSettings, RoomStatus, Timestamp},
        state_machine::{Action, Actor, Command, RejectReason, RoomStateMachine},
    },
    sync::{
        SyncError,
        identity::Identity,
        view::{Connection, RoomObserver, RoomView},
    },
};

/// Minimum pause before the round timer tries again.
const TIMER_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Something a player asks the room to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Join the room under the identity's display name, or reconnect.
    Join,
    /// Replace the rules while in the lobby.
    UpdateSettings(RoomRules),
    /// Start round 1.
    StartGame,
    /// Hand in an answer sheet.
    SubmitAnswers(IndexMap<String, String>),
    /// Rule on one answer.
    ValidateAnswer {
        /// Owner of the answer.
        player_id: PlayerId,
        /// Category of the answer.
        category: String,
        /// Verdict.
        valid: bool,
    },
    /// Close the reviewed round.
    AdvanceRound {
        /// Close even with unvalidated answers.
        force: bool,
    },
    /// Leave the room view.
    Leave,
}

/// Tunables of a sync engine.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Upper bound for a whole dispatch, retries included.
    pub dispatch_timeout: Duration,
    /// Whether this engine expires rounds when their clock runs out.
    pub run_round_timer: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(5),
            run_round_timer: true,
        }
    }
}

/// Assembles a [`SyncEngine`] from its collaborators.
pub struct SyncEngineBuilder {
    store: Arc<dyn RoomStore>,
    identity: Arc<dyn Identity>,
    clock: Arc<dyn Clock>,
    prompts: Arc<dyn PromptSource>,
    machine: RoomStateMachine,
    options: SyncOptions,
}

impl SyncEngineBuilder {
    /// Start from a store and an identity, with system defaults for the rest.
    pub fn new(store: Arc<dyn RoomStore>, identity: Arc<dyn Identity>) -> Self {
        Self {
            store,
            identity,
            clock: Arc::new(SystemClock),
            prompts: Arc::new(AlphabetPrompts::new(Arc::new(AppConfig::default()))),
            machine: RoomStateMachine::new(),
            options: SyncOptions::default(),
        }
    }

    /// Use `clock` for command timestamps and the round timer.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `prompts` to draw round letters.
    pub fn prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Use a state machine with a specific policy.
    pub fn machine(mut self, machine: RoomStateMachine) -> Self {
        self.machine = machine;
        self
    }

    /// Override the tunables.
    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Build an engine bound to an existing room.
    pub fn build(self, room_id: RoomId) -> SyncEngine {
        let (view, _) = watch::channel(RoomView::connecting());
        SyncEngine {
            inner: Arc::new(EngineInner {
                room_id,
                store: self.store,
                identity: self.identity,
                clock: self.clock,
                prompts: self.prompts,
                machine: self.machine,
                options: self.options,
                view,
                gate: AsyncMutex::new(()),
                following: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                tasks: Mutex::new(EngineTasks::default()),
            }),
        }
    }

    /// Create a new room administered by the identity, then bind an engine to it.
    ///
    /// A fresh identifier is generated when `room_id` is `None`.
    pub async fn create(
        self,
        room_id: Option<RoomId>,
        rules: RoomRules,
    ) -> Result<SyncEngine, SyncError> {
        let admin_id = signed_in_player(self.identity.as_ref())?;
        let settings = RoomSettings::from_rules(rules, admin_id.as_str())?;
        let room_id = room_id.unwrap_or_else(RoomId::generate);
        let room = RoomDocument::new(
            room_id.clone(),
            settings,
            &self.identity.current_display_name(),
            self.clock.now(),
        )?;

        let limit = self.options.dispatch_timeout;
        let stored = timeout(limit, self.store.create(room))
            .await
            .map_err(|_| SyncError::Timeout(limit))??;
        info!(%room_id, admin = %admin_id, "room created");

        let engine = self.build(room_id);
        engine.inner.publish_document(Arc::new(stored));
        Ok(engine)
    }
}

/// One client's synchronized handle on a room.
///
/// Dropping the engine releases its subscription and timer; the room itself is
/// never touched by teardown.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
    identity: Arc<dyn Identity>,
    clock: Arc<dyn Clock>,
    prompts: Arc<dyn PromptSource>,
    machine: RoomStateMachine,
    options: SyncOptions,
    view: watch::Sender<RoomView>,
    gate: AsyncMutex<()>,
    following: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<EngineTasks>,
}

#[derive(Default)]
struct EngineTasks {
    follower: Option<JoinHandle<()>>,
    timer: Option<(u32, JoinHandle<()>)>,
}

/// Who a dispatch is issued for.
enum Request<'a> {
    Player(&'a Intent),
    Timer,
}

/// Whether the follower keeps going after a reconciliation.
#[derive(Debug, PartialEq, Eq)]
enum Follow {
    Continue,
    Stop,
}

impl SyncEngine {
    /// Room this engine is bound to.
    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    /// Start following the room and return a live observer.
    ///
    /// The first fetch has completed when this returns, so the observer already
    /// reports `Live`, `NotFound`, `Disconnected` or `Corrupt`.
    pub async fn observe(&self) -> RoomObserver {
        if !self.inner.following.swap(true, Ordering::SeqCst) {
            let events = self.inner.store.subscribe(&self.inner.room_id);
            let follow = self.inner.reconcile().await;
            if follow == Follow::Continue {
                let handle = tokio::spawn(follow_room(Arc::downgrade(&self.inner), events));
                self.inner.lock_tasks().follower = Some(handle);
            }
        }
        self.observer()
    }

    /// Observer over the current view without starting to follow the store.
    pub fn observer(&self) -> RoomObserver {
        RoomObserver::new(
            self.inner.view.subscribe(),
            self.inner.identity.current_player_id(),
        )
    }

    /// Number of observers still attached to the view.
    pub fn observer_count(&self) -> usize {
        self.inner.view.receiver_count()
    }

    /// Current view.
    pub fn snapshot(&self) -> RoomView {
        self.inner.view.borrow().clone()
    }

    /// Re-fetch the room and return the updated view.
    pub async fn refresh(&self) -> RoomView {
        self.inner.reconcile().await;
        self.snapshot()
    }

    /// Prime the view with a document obtained elsewhere.
    pub fn seed(&self, room: Arc<RoomDocument>) {
        self.inner.publish_document(room);
    }

    /// Apply `intent` for the engine's identity and persist it.
    ///
    /// A version conflict is retried once against a re-fetched document; a second
    /// conflict is returned as [`SyncError::Conflict`].
    pub async fn dispatch(&self, intent: Intent) -> Result<Arc<RoomDocument>, SyncError> {
        self.inner.dispatch_guarded(Request::Player(&intent)).await
    }

    /// Stop following the room. Equivalent to dropping the engine.
    pub fn close(self) {}
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl EngineInner {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, EngineTasks> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let mut tasks = self.lock_tasks();
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = tasks.follower.take() {
            handle.abort();
        }
        if let Some((_, handle)) = tasks.timer.take() {
            handle.abort();
        }
        debug!(room_id = %self.room_id, "sync engine closed");
    }

    fn current_document(&self) -> Option<Arc<RoomDocument>> {
        self.view.borrow().document.clone()
    }

    /// Accept `room` into the view unless it is older than what is already known.
    fn publish_document(self: &Arc<Self>, room: Arc<RoomDocument>) {
        let accepted = self.view.send_if_modified(|view| {
            if view.connection == Connection::Corrupt {
                return false;
            }
            if let Some(known) = &view.document {
                if known.version > room.version {
                    return false;
                }
                if known.version == room.version && view.connection == Connection::Live {
                    return false;
                }
            }
            view.connection = Connection::Live;
            view.document = Some(room.clone());
            view.error = None;
            true
        });

        if accepted {
            debug!(
                room_id = %self.room_id,
                version = room.version,
                status = %room.status,
                "room view updated"
            );
            self.arm_timer(&room);
        }
    }

    fn mark(&self, connection: Connection, reason: String) {
        self.view.send_if_modified(|view| {
            if view.connection == Connection::Corrupt || view.connection == connection {
                return false;
            }
            view.connection = connection;
            view.error = Some(reason);
            if connection == Connection::NotFound || connection == Connection::Corrupt {
                view.document = None;
            }
            true
        });
    }

    /// Reflect a store failure in the view.
    fn note_store_error(&self, err: &StoreError) {
        match err {
            StoreError::NotFound(_) => self.mark(Connection::NotFound, err.to_string()),
            StoreError::Corrupt { .. } => {
                warn!(room_id = %self.room_id, error = %err, "room document is corrupt");
                self.mark(Connection::Corrupt, err.to_string());
            }
            StoreError::Unavailable { .. } => self.mark(Connection::Disconnected, err.to_string()),
            StoreError::AlreadyExists(_)
            | StoreError::VersionConflict { .. }
            | StoreError::InvalidWrite { .. } => {}
        }
    }

    /// Fetch the room and fold the result into the view.
    async fn reconcile(self: &Arc<Self>) -> Follow {
        match self.store.fetch(self.room_id.clone()).await {
            Ok(room) => {
                self.publish_document(Arc::new(room));
                Follow::Continue
            }
            Err(err) => {
                self.note_store_error(&err);
                if matches!(err, StoreError::Corrupt { .. }) {
                    Follow::Stop
                } else {
                    Follow::Continue
                }
            }
        }
    }

    async fn fetch_base(self: &Arc<Self>) -> Result<Arc<RoomDocument>, SyncError> {
        match self.store.fetch(self.room_id.clone()).await {
            Ok(room) => {
                let room = Arc::new(room);
                self.publish_document(room.clone());
                Ok(room)
            }
            Err(err) => {
                self.note_store_error(&err);
                Err(err.into())
            }
        }
    }

    fn actor_for(&self, request: &Request<'_>) -> Result<Actor, SyncError> {
        match request {
            Request::Timer => Ok(Actor::System),
            Request::Player(_) => signed_in_player(self.identity.as_ref()).map(Actor::Player),
        }
    }

    fn action_for(&self, request: &Request<'_>, base: &RoomDocument) -> Action {
        let draw_prompt = || {
            self.prompts
                .next_prompt(base.settings.language, &base.used_prompts())
        };

        match request {
            Request::Timer => Action::TimerExpired,
            Request::Player(intent) => match intent {
                Intent::Join => Action::Join {
                    name: self.identity.current_display_name(),
                },
                Intent::UpdateSettings(rules) => Action::UpdateSettings(rules.clone()),
                Intent::StartGame => Action::StartGame {
                    prompt: draw_prompt(),
                },
                Intent::SubmitAnswers(answers) => Action::SubmitAnswers {
                    answers: answers.clone(),
                },
                Intent::ValidateAnswer {
                    player_id,
                    category,
                    valid,
                } => Action::ValidateAnswer {
                    player_id: player_id.clone(),
                    category: category.clone(),
                    valid: *valid,
                },
                Intent::AdvanceRound { force } => Action::AdvanceRound {
                    force: *force,
                    prompt: if base.current_round < base.settings.rounds_total {
                        draw_prompt()
                    } else {
                        String::new()
                    },
                },
                Intent::Leave => Action::Leave,
            },
        }
    }

    async fn dispatch_guarded(
        self: &Arc<Self>,
        request: Request<'_>,
    ) -> Result<Arc<RoomDocument>, SyncError> {
        let limit = self.options.dispatch_timeout;
        let _gate = self.gate.lock().await;
        match timeout(limit, self.dispatch_once_retried(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(room_id = %self.room_id, ?limit, "dispatch timed out");
                Err(SyncError::Timeout(limit))
            }
        }
    }

    async fn dispatch_once_retried(
        self: &Arc<Self>,
        request: Request<'_>,
    ) -> Result<Arc<RoomDocument>, SyncError> {
        let actor = self.actor_for(&request)?;

        if self.view.borrow().connection == Connection::Corrupt {
            return Err(SyncError::Corrupt {
                room_id: self.room_id.clone(),
                reason: self
                    .view
                    .borrow()
                    .error
                    .clone()
                    .unwrap_or_else(|| "corrupt room document".to_string()),
            });
        }

        let mut base = match self.current_document() {
            Some(room) => room,
            None => self.fetch_base().await?,
        };
        let mut retried = false;

        loop {
            let command = Command {
                actor: actor.clone(),
                action: self.action_for(&request, &base),
                at: self.clock.now(),
            };
            let kind = command.action.kind();
            let next = match self.machine.apply(&base, &command) {
                Ok(next) => next,
                Err(rejection) => {
                    debug!(
                        room_id = %self.room_id,
                        version = base.version,
                        action = %kind,
                        reason = %rejection.reason,
                        "intent rejected"
                    );
                    return Err(rejection.into());
                }
            };

            let expected = base.version;
            let result = self
                .store
                .conditional_update(self.room_id.clone(), expected, Box::new(move |_| next))
                .await;

            match result {
                Ok(stored) => {
                    let stored = Arc::new(stored);
                    debug!(
                        room_id = %self.room_id,
                        version = stored.version,
                        action = %kind,
                        "intent applied"
                    );
                    self.publish_document(stored.clone());
                    return Ok(stored);
                }
                Err(StoreError::VersionConflict { .. }) if !retried => {
                    debug!(
                        room_id = %self.room_id,
                        expected,
                        action = %kind,
                        "version conflict; retrying on a fresh document"
                    );
                    retried = true;
                    base = self.fetch_base().await?;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(
                        room_id = %self.room_id,
                        expected,
                        action = %kind,
                        "second version conflict; giving up"
                    );
                    return Err(SyncError::Conflict {
                        room_id: self.room_id.clone(),
                        version: expected,
                    });
                }
                Err(err) => {
                    self.note_store_error(&err);
                    return Err(err.into());
                }
            }
        }
    }

    /// Keep exactly one timer armed for the running round.
    fn arm_timer(self: &Arc<Self>, room: &RoomDocument) {
        if !self.options.run_round_timer {
            return;
        }

        let mut tasks = self.lock_tasks();
        if self.is_closed() {
            return;
        }

        match room.round_deadline() {
            Some(deadline) => {
                let round = room.current_round;
                if let Some((armed, handle)) = &tasks.timer
                    && *armed == round
                    && !handle.is_finished()
                {
                    return;
                }
                if let Some((_, stale)) = tasks.timer.take() {
                    stale.abort();
                }
                let handle = tokio::spawn(run_round_timer(Arc::downgrade(self), round, deadline));
                tasks.timer = Some((round, handle));
            }
            None => {
                if let Some((_, handle)) = tasks.timer.take() {
                    handle.abort();
                }
            }
        }
    }

    fn is_running_round(&self, round: u32) -> bool {
        self.view
            .borrow()
            .document
            .as_ref()
            .is_some_and(|room| room.status == RoomStatus::Playing && room.current_round == round)
    }
}

fn signed_in_player(identity: &dyn Identity) -> Result<PlayerId, SyncError> {
    if !identity.is_signed_in() {
        return Err(SyncError::NotSignedIn);
    }
    identity.current_player_id().ok_or(SyncError::NotSignedIn)
}

/// Forward store notifications into the view until the engine goes away.
async fn follow_room(engine: Weak<EngineInner>, mut events: RoomSubscription) {
    loop {
        let event = events.recv().await;
        let Some(inner) = engine.upgrade() else {
            break;
        };
        if inner.is_closed() {
            break;
        }

        let follow = match event {
            Ok(RoomEvent::Changed(room)) => {
                inner.publish_document(room);
                Follow::Continue
            }
            Ok(RoomEvent::Disconnected { reason }) => {
                info!(room_id = %inner.room_id, %reason, "room view disconnected");
                inner.mark(Connection::Disconnected, reason);
                Follow::Continue
            }
            Ok(RoomEvent::Reconnected) => {
                info!(room_id = %inner.room_id, "room view reconnecting");
                inner.reconcile().await
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(room_id = %inner.room_id, skipped, "room subscription lagged; re-fetching");
                inner.reconcile().await
            }
            Err(RecvError::Closed) => {
                inner.mark(Connection::Disconnected, "subscription closed".to_string());
                Follow::Stop
            }
        };

        if follow == Follow::Stop || inner.view.borrow().connection == Connection::Corrupt {
            debug!(room_id = %inner.room_id, "room follower stopped");
            break;
        }
    }
}

/// Expire round `round` once its deadline passes, unless someone else did first.
async fn run_round_timer(engine: Weak<EngineInner>, round: u32, deadline: Timestamp) {
    let mut wait = {
        let Some(inner) = engine.upgrade() else {
            return;
        };
        deadline.duration_since(inner.clock.now())
    };

    loop {
        sleep(wait).await;

        let Some(inner) = engine.upgrade() else {
            return;
        };
        if inner.is_closed() || !inner.is_running_round(round) {
            return;
        }

        match inner.dispatch_guarded(Request::Timer).await {
            Ok(room) => {
                info!(
                    room_id = %inner.room_id,
                    round,
                    version = room.version,
                    "round timer expired"
                );
                return;
            }
            Err(SyncError::Rejected(rejection))
                if rejection.reason == RejectReason::TimerRunning =>
            {
                wait = deadline
                    .duration_since(inner.clock.now())
                    .max(TIMER_RETRY_DELAY);
            }
            Err(SyncError::Rejected(rejection)) => {
                debug!(
                    room_id = %inner.room_id,
                    round,
                    reason = %rejection.reason,
                    "round already closed elsewhere"
                );
                return;
            }
            Err(err) if err.is_retryable() => {
                warn!(
                    room_id = %inner.room_id,
                    round,
                    error = %err,
                    "round timer dispatch failed; retrying"
                );
                wait = TIMER_RETRY_DELAY;
            }
            Err(err) => {
                warn!(room_id = %inner.room_id, round, error = %err, "round timer gave up");
                return;
            }
        }
    }
}
