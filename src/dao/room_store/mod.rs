#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;

use crate::{
    dao::{hub::RoomSubscription, storage::StoreResult},
    state::room::{RoomDocument, RoomId},
};

/// Transformation applied to the stored document inside a conditional write.
pub type RoomMutator = Box<dyn FnOnce(RoomDocument) -> RoomDocument + Send>;

/// Shared document store holding one versioned document per room.
///
/// Every accepted write bumps `version` by one and stamps `updated_at`; every
/// read re-validates the stored document.
pub trait RoomStore: Send + Sync {
    /// Persist a new room. Fails with `AlreadyExists` when the id is taken.
    fn create(&self, room: RoomDocument) -> BoxFuture<'static, StoreResult<RoomDocument>>;
    /// Load the current document of a room.
    fn fetch(&self, room_id: RoomId) -> BoxFuture<'static, StoreResult<RoomDocument>>;
    /// Receive every accepted write to the room from now on.
    fn subscribe(&self, room_id: &RoomId) -> RoomSubscription;
    /// Apply `mutator` only if the stored version still equals `expected_version`.
    fn conditional_update(
        &self,
        room_id: RoomId,
        expected_version: u64,
        mutator: RoomMutator,
    ) -> BoxFuture<'static, StoreResult<RoomDocument>>;
    /// Cheap round-trip proving the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StoreResult<()>>;
    /// Forward a connectivity change to every subscriber.
    fn announce_connectivity(&self, online: bool);
}
