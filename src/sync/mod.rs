//! Client-side synchronization of one room: reactive view, intent dispatch with
//! bounded conflict retry, and the round timer.

mod engine;
mod identity;
mod view;

use std::time::Duration;

use thiserror::Error;

use crate::{
    dao::storage::StoreError,
    state::{
        room::{RoomId, SettingsError},
        state_machine::Rejection,
    },
};

pub use engine::{Intent, SyncEngine, SyncEngineBuilder, SyncOptions};
pub use identity::{Identity, StaticIdentity};
pub use view::{Connection, RoomObserver, RoomView};

/// Failures surfaced by [`SyncEngine`] operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The identity collaborator reports no signed-in player.
    #[error("caller is not signed in")]
    NotSignedIn,
    /// The state machine refused the intent.
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// The room moved twice underneath the dispatch.
    #[error("room `{room_id}` changed concurrently again after version {version}; retry")]
    Conflict {
        /// Room being written.
        room_id: RoomId,
        /// Version the last attempt was based on.
        version: u64,
    },
    /// The room does not exist.
    #[error("room `{0}` not found")]
    NotFound(RoomId),
    /// The stored document violates the room invariants.
    #[error("room `{room_id}` is corrupt: {reason}")]
    Corrupt {
        /// Room that failed to decode.
        room_id: RoomId,
        /// What was wrong with it.
        reason: String,
    },
    /// A room with the requested identifier already exists.
    #[error("room `{0}` already exists")]
    AlreadyExists(RoomId),
    /// The requested settings are invalid.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    /// The store could not be reached.
    #[error("store unavailable")]
    Unavailable(#[source] StoreError),
    /// The store refused a successor document the state machine produced.
    #[error("store refused the computed document")]
    Internal(#[source] StoreError),
    /// The store did not answer in time.
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    /// The engine backing an observer was dropped.
    #[error("room view closed")]
    ViewClosed,
}

impl SyncError {
    /// Whether retrying the same intent later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Conflict { .. } | SyncError::Unavailable(_) | SyncError::Timeout(_)
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(room_id) => SyncError::AlreadyExists(room_id),
            StoreError::NotFound(room_id) => SyncError::NotFound(room_id),
            StoreError::VersionConflict { room_id, expected } => SyncError::Conflict {
                room_id,
                version: expected,
            },
            StoreError::Corrupt { room_id, reason } => SyncError::Corrupt { room_id, reason },
            err @ StoreError::InvalidWrite { .. } => SyncError::Internal(err),
            err @ StoreError::Unavailable { .. } => SyncError::Unavailable(err),
        }
    }
}
