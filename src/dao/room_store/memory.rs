use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    dao::{
        hub::{RoomHub, RoomSubscription},
        models::{decode_room, encode_room, stamp_created, stamp_successor},
        room_store::{RoomMutator, RoomStore},
        storage::{StoreError, StoreResult},
    },
    state::room::{RoomDocument, RoomId},
};

/// Process-local store keeping each room as its serialized payload.
///
/// Payloads are decoded and re-validated on every read, exactly like the
/// persistent backends, so corrupt documents surface the same way.
#[derive(Clone)]
pub struct InMemoryRoomStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    rooms: DashMap<RoomId, String>,
    hub: RoomHub,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl Default for InMemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRoomStore {
    /// Store stamping writes with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store stamping writes with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                rooms: DashMap::new(),
                hub: RoomHub::new(),
                clock,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate an outage (or its end) and notify subscribers.
    pub fn set_available(&self, available: bool) {
        let previous = self.inner.available.swap(available, Ordering::SeqCst);
        if previous != available {
            info!(available, "in-memory store availability changed");
            self.inner.hub.announce(available, "in-memory store switched offline");
        }
    }

    /// Overwrite the stored payload of a room, bypassing every check.
    pub fn put_raw(&self, room_id: RoomId, payload: impl Into<String>) {
        self.inner.rooms.insert(room_id, payload.into());
    }

    /// Number of stored rooms.
    pub fn len(&self) -> usize {
        self.inner.rooms.len()
    }

    /// Whether no room is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.rooms.is_empty()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable(
                "in-memory store is offline".to_string(),
                io::Error::new(io::ErrorKind::NotConnected, "store switched offline"),
            ))
        }
    }

    fn create_now(&self, room: RoomDocument) -> StoreResult<RoomDocument> {
        self.ensure_available()?;
        let room = stamp_created(room, self.inner.clock.now())?;
        let payload = encode_room(&room)?;
        match self.inner.rooms.entry(room.room_id.clone()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(room.room_id)),
            Entry::Vacant(slot) => {
                slot.insert(payload);
            }
        }
        self.inner.hub.publish(&room);
        Ok(room)
    }

    fn fetch_now(&self, room_id: &RoomId) -> StoreResult<RoomDocument> {
        self.ensure_available()?;
        let payload = self
            .inner
            .rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(room_id.clone()))?;
        decode_room(room_id, &payload)
    }

    fn update_now(
        &self,
        room_id: &RoomId,
        expected_version: u64,
        mutator: RoomMutator,
    ) -> StoreResult<RoomDocument> {
        self.ensure_available()?;
        let stored = {
            let mut entry = self
                .inner
                .rooms
                .get_mut(room_id)
                .ok_or_else(|| StoreError::NotFound(room_id.clone()))?;
            let current = decode_room(room_id, entry.value())?;
            if current.version != expected_version {
                return Err(StoreError::VersionConflict {
                    room_id: room_id.clone(),
                    expected: expected_version,
                });
            }
            let next = stamp_successor(&current, mutator(current.clone()), self.inner.clock.now())?;
            *entry.value_mut() = encode_room(&next)?;
            next
        };
        self.inner.hub.publish(&stored);
        Ok(stored)
    }
}

impl RoomStore for InMemoryRoomStore {
    fn create(&self, room: RoomDocument) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.create_now(room) })
    }

    fn fetch(&self, room_id: RoomId) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.fetch_now(&room_id) })
    }

    fn subscribe(&self, room_id: &RoomId) -> RoomSubscription {
        self.inner.hub.subscribe(room_id)
    }

    fn conditional_update(
        &self,
        room_id: RoomId,
        expected_version: u64,
        mutator: RoomMutator,
    ) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.update_now(&room_id, expected_version, mutator) })
    }

    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_available() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_available() })
    }

    fn announce_connectivity(&self, online: bool) {
        self.inner.hub.announce(online, "storage unreachable");
    }
}
