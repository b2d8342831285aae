use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::watch;

use crate::{
    state::room::{PlayerId, RoomDocument, Timestamp},
    sync::SyncError,
};

/// Connectivity of a room view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    /// First fetch still in flight.
    Connecting,
    /// Following the store; the document is current.
    Live,
    /// Store unreachable; the document is the last one seen.
    Disconnected,
    /// The room does not exist.
    NotFound,
    /// The stored document violates the room invariants. Terminal.
    Corrupt,
}

/// Latest known state of a room as seen by one client.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    /// Connectivity status.
    pub connection: Connection,
    /// Last accepted document, if any was ever seen.
    pub document: Option<Arc<RoomDocument>>,
    /// Explanation attached to the non-live statuses.
    pub error: Option<String>,
}

impl RoomView {
    pub(crate) fn connecting() -> Self {
        Self {
            connection: Connection::Connecting,
            document: None,
            error: None,
        }
    }

    /// Version of the known document.
    pub fn version(&self) -> Option<u64> {
        self.document.as_ref().map(|room| room.version)
    }
}

/// Read-only handle on a continuously updated [`RoomView`].
#[derive(Debug, Clone)]
pub struct RoomObserver {
    receiver: watch::Receiver<RoomView>,
    player_id: Option<PlayerId>,
}

impl RoomObserver {
    pub(crate) fn new(receiver: watch::Receiver<RoomView>, player_id: Option<PlayerId>) -> Self {
        Self {
            receiver,
            player_id,
        }
    }

    /// Copy of the current view.
    pub fn current(&self) -> RoomView {
        self.receiver.borrow().clone()
    }

    /// Whether the observing identity administers the room.
    pub fn is_admin(&self) -> bool {
        let view = self.receiver.borrow();
        match (&view.document, &self.player_id) {
            (Some(room), Some(player_id)) => room.is_admin(player_id.as_str()),
            _ => false,
        }
    }

    /// Time left in the running round.
    pub fn time_remaining(&self, now: Timestamp) -> Option<Duration> {
        self.receiver
            .borrow()
            .document
            .as_ref()
            .and_then(|room| room.time_remaining(now))
    }

    /// Wait for the next change and return the new view.
    pub async fn changed(&mut self) -> Result<RoomView, SyncError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| SyncError::ViewClosed)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the view satisfies `predicate`, checking the current value first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&RoomView) -> bool,
    ) -> Result<RoomView, SyncError> {
        self.receiver
            .wait_for(predicate)
            .await
            .map(|view| RoomView::clone(&view))
            .map_err(|_| SyncError::ViewClosed)
    }

    /// Underlying watch receiver, for stream adapters.
    pub fn into_receiver(self) -> watch::Receiver<RoomView> {
        self.receiver
    }
}
