use std::error::Error;

use thiserror::Error;

use crate::state::room::{DocumentError, RoomId};

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by room stores regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `create` targeted an identifier that is already taken.
    #[error("room `{0}` already exists")]
    AlreadyExists(RoomId),
    /// No document is stored under the identifier.
    #[error("room `{0}` not found")]
    NotFound(RoomId),
    /// The stored version moved past the expected one.
    #[error("room `{room_id}` is no longer at version {expected}")]
    VersionConflict {
        /// Room being written.
        room_id: RoomId,
        /// Version the writer based its change on.
        expected: u64,
    },
    /// The stored document violates the room invariants.
    #[error("room `{room_id}` is corrupt: {reason}")]
    Corrupt {
        /// Room that failed to decode.
        room_id: RoomId,
        /// What was wrong with it.
        reason: String,
    },
    /// A mutator produced a document that may not replace the stored one.
    #[error("rejected write to room `{room_id}`")]
    InvalidWrite {
        /// Room being written.
        room_id: RoomId,
        /// Broken invariant.
        #[source]
        source: DocumentError,
    },
    /// The backend could not be reached.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Operator-facing summary.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corrupt-state error.
    pub fn corrupt(room_id: &RoomId, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            room_id: room_id.clone(),
            reason: reason.to_string(),
        }
    }
}
