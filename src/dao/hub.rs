use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::room::{RoomDocument, RoomId};

const ROOM_CHANNEL_CAPACITY: usize = 64;

/// Notification delivered to room subscribers.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A write was accepted; carries the stored document.
    Changed(Arc<RoomDocument>),
    /// The backend lost connectivity.
    Disconnected {
        /// Operator-facing reason.
        reason: String,
    },
    /// The backend is reachable again.
    Reconnected,
}

/// Receiver side of a room subscription. Dropping it unsubscribes.
pub type RoomSubscription = broadcast::Receiver<RoomEvent>;

/// In-process fan-out of room notifications, one channel per room.
#[derive(Debug, Default)]
pub struct RoomHub {
    channels: DashMap<RoomId, broadcast::Sender<RoomEvent>>,
}

impl RoomHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to notifications for `room_id`.
    pub fn subscribe(&self, room_id: &RoomId) -> RoomSubscription {
        self.channels
            .entry(room_id.clone())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an accepted write to the room's subscribers.
    pub fn publish(&self, room: &RoomDocument) {
        let event = RoomEvent::Changed(Arc::new(room.clone()));
        let delivered = self
            .channels
            .get(&room.room_id)
            .and_then(|sender| sender.send(event).ok());
        if delivered.is_none() {
            // nobody listening any more
            self.channels
                .remove_if(&room.room_id, |_, sender| sender.receiver_count() == 0);
        }
        debug!(
            room_id = %room.room_id,
            version = room.version,
            receivers = delivered.unwrap_or(0),
            "room change published"
        );
    }

    /// Tell every subscriber about a connectivity change.
    pub fn announce(&self, online: bool, reason: &str) {
        for entry in self.channels.iter() {
            let event = if online {
                RoomEvent::Reconnected
            } else {
                RoomEvent::Disconnected {
                    reason: reason.to_string(),
                }
            };
            let _ = entry.value().send(event);
        }
    }

    /// Number of rooms with at least one open channel.
    pub fn room_count(&self) -> usize {
        self.channels.len()
    }
}
