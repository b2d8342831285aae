pub mod prompts;
pub mod room;
pub mod state_machine;
pub mod stats;

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    dao::room_store::RoomStore,
    error::ServiceError,
    sync::{
        Connection, Identity, StaticIdentity, SyncEngine, SyncEngineBuilder, SyncError, SyncOptions,
    },
};

use self::{
    prompts::{AlphabetPrompts, PromptSource},
    room::{RoomDocument, RoomId, RoomStatus},
    state_machine::RoomStateMachine,
};

/// Cheaply clonable handle on the application state.
pub type SharedState = Arc<AppState>;

/// Central application state: the room store, one host engine per served room and the
/// degraded flag.
pub struct AppState {
    config: Arc<AppConfig>,
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    rooms: DashMap<RoomId, Arc<SyncEngine>>,
    degraded: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
    prompts: Arc<dyn PromptSource>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let config = Arc::new(config);
        let prompts = Arc::new(AlphabetPrompts::new(config.clone()));
        Self::with_parts(config, Arc::new(SystemClock), prompts)
    }

    /// Construct the state around explicit collaborators.
    pub fn with_parts(
        config: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
        prompts: Arc<dyn PromptSource>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            room_store: RwLock::new(None),
            rooms: DashMap::new(),
            degraded: degraded_tx,
            clock,
            prompts,
        })
    }

    /// Loaded application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Clock stamping commands issued through this process.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current room store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new room store and leave degraded mode.
    ///
    /// Host engines bound to a previous store are released.
    pub async fn set_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.rooms.clear();
        self.update_degraded(false).await;
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.rooms.clear();
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let flagged = *self.degraded.borrow();
        flagged || self.room_store.read().await.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
        if !changed {
            return;
        }

        info!(degraded = value, "degraded mode changed");
        if let Some(store) = self.room_store().await {
            store.announce_connectivity(!value);
        }
    }

    /// Engine builder preconfigured with this process' collaborators.
    pub fn engine_builder(
        &self,
        store: Arc<dyn RoomStore>,
        identity: Arc<dyn Identity>,
        run_round_timer: bool,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder::new(store, identity)
            .clock(self.clock.clone())
            .prompts(self.prompts.clone())
            .machine(RoomStateMachine::with_policy(self.config.room_policy()))
            .options(SyncOptions {
                dispatch_timeout: self.config.dispatch_timeout(),
                run_round_timer,
            })
    }

    /// Start hosting a room this process just created.
    pub fn adopt_room(&self, engine: SyncEngine) -> Arc<SyncEngine> {
        let room_id = engine.room_id().clone();
        let engine = Arc::new(engine);
        match self.rooms.entry(room_id) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => slot.insert(engine).clone(),
        }
    }

    /// Host engine of `room_id`, following the room and running its round timer.
    ///
    /// The first call for a room fetches it; unknown rooms are not retained.
    pub async fn host_room(&self, room_id: &RoomId) -> Result<Arc<SyncEngine>, ServiceError> {
        if let Some(engine) = self.rooms.get(room_id) {
            return Ok(engine.clone());
        }

        let store = self.require_room_store().await?;
        let engine = self
            .engine_builder(store, Arc::new(StaticIdentity::anonymous()), true)
            .build(room_id.clone());
        let view = engine.observe().await.current();
        match view.connection {
            Connection::NotFound => return Err(SyncError::NotFound(room_id.clone()).into()),
            Connection::Corrupt => {
                return Err(SyncError::Corrupt {
                    room_id: room_id.clone(),
                    reason: view.error.unwrap_or_default(),
                }
                .into());
            }
            Connection::Connecting | Connection::Disconnected if view.document.is_none() => {
                return Err(ServiceError::Degraded);
            }
            Connection::Connecting | Connection::Disconnected | Connection::Live => {}
        }

        debug!(%room_id, "hosting room");
        Ok(self.adopt_room(engine))
    }

    /// Number of rooms currently hosted by this process.
    pub fn hosted_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Fold a document written by a caller engine into the host, then release the host
    /// if the room no longer needs one.
    pub fn settle_room(&self, room: &Arc<RoomDocument>) {
        let host = self.rooms.get(&room.room_id).map(|entry| entry.value().clone());
        if let Some(host) = host {
            host.seed(room.clone());
        }
        self.release_idle_room(&room.room_id);
    }

    /// Stop hosting `room_id` when its host is idle.
    ///
    /// A host is idle once its room is finished, missing or corrupt, or once no player
    /// is connected and no stream observes it. Hosts still borrowed by a request are kept.
    pub fn release_idle_room(&self, room_id: &RoomId) -> bool {
        let released = self
            .rooms
            .remove_if(room_id, |_, engine| Arc::strong_count(engine) == 1 && is_idle(engine))
            .is_some();
        if released {
            debug!(%room_id, "released idle room host");
        }
        released
    }

    /// Short-lived engine acting for `identity`.
    ///
    /// The room gets hosted first so its timer runs; the engine itself starts empty and
    /// reads the latest document on its first dispatch.
    pub async fn caller_engine(
        &self,
        room_id: &RoomId,
        identity: Arc<dyn Identity>,
    ) -> Result<SyncEngine, ServiceError> {
        self.host_room(room_id).await?;
        let store = self.require_room_store().await?;
        Ok(self
            .engine_builder(store, identity, false)
            .build(room_id.clone()))
    }
}

fn is_idle(engine: &SyncEngine) -> bool {
    let view = engine.snapshot();
    match (view.connection, view.document.as_deref()) {
        (Connection::NotFound | Connection::Corrupt, _) => true,
        (_, Some(room)) if room.status == RoomStatus::Finished => true,
        (_, Some(room)) => {
            engine.observer_count() == 0 && !room.players.values().any(|player| player.connected)
        }
        (_, None) => engine.observer_count() == 0,
    }
}
