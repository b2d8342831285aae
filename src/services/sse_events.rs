use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{
        room::RoomSnapshot,
        sse::{ConnectionStatus, Handshake, ServerEvent, SystemStatus},
    },
    state::room::{PlayerId, RoomId, Timestamp},
    sync::{Connection, RoomView},
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_ROOM: &str = "room";
const EVENT_CONNECTION: &str = "connection";
const EVENT_SYSTEM: &str = "system";

/// First event of every room stream.
pub fn handshake(
    room_id: &RoomId,
    viewer: Option<&PlayerId>,
    degraded: bool,
) -> Option<ServerEvent> {
    let payload = Handshake {
        room_id: room_id.to_string(),
        player_id: viewer.map(ToString::to_string),
        message: "room stream connected".to_string(),
        degraded,
    };
    encode(EVENT_HANDSHAKE, &payload)
}

/// Events describing `view` for `viewer`: the connectivity status when it is not
/// live, then the room snapshot when a document is known.
pub fn room_view(
    view: &RoomView,
    viewer: Option<&PlayerId>,
    now: Timestamp,
    degraded: bool,
) -> Vec<ServerEvent> {
    let mut events = Vec::with_capacity(2);

    if view.connection != Connection::Live {
        let payload = ConnectionStatus {
            connection: connection_name(view.connection).to_string(),
            error: view.error.clone(),
        };
        events.extend(encode(EVENT_CONNECTION, &payload));
    }

    if let Some(room) = &view.document {
        let snapshot = RoomSnapshot::build(room, viewer, view.connection, now, degraded);
        events.extend(encode(EVENT_ROOM, &snapshot));
    }

    events
}

/// Event announcing a change of the degraded flag.
pub fn system_status(degraded: bool) -> Option<ServerEvent> {
    encode(EVENT_SYSTEM, &SystemStatus { degraded })
}

fn connection_name(connection: Connection) -> &'static str {
    match connection {
        Connection::Connecting => "connecting",
        Connection::Live => "live",
        Connection::Disconnected => "disconnected",
        Connection::NotFound => "not_found",
        Connection::Corrupt => "corrupt",
    }
}

fn encode<T: Serialize>(event: &str, payload: &T) -> Option<ServerEvent> {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialise SSE payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::room::{Language, RoomDocument, RoomRules, RoomSettings};

    fn view(connection: Connection) -> RoomView {
        let settings = RoomSettings::from_rules(
            RoomRules {
                rounds_total: 1,
                time_per_round_seconds: 30,
                categories: vec!["Animal".into()],
                language: Language::En,
                end_round_on_first_submit: false,
            },
            "ada",
        )
        .unwrap();
        let room = RoomDocument::new(
            RoomId::parse("r1").unwrap(),
            settings,
            "Ada",
            Timestamp::from_millis(0),
        )
        .unwrap();
        RoomView {
            connection,
            document: Some(Arc::new(room)),
            error: (connection != Connection::Live).then(|| "store offline".to_string()),
        }
    }

    #[test]
    fn live_view_emits_only_the_snapshot() {
        let events = room_view(&view(Connection::Live), None, Timestamp::from_millis(1), false);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("room"));
        assert!(events[0].data.contains("\"room_id\":\"r1\""));
    }

    #[test]
    fn disconnected_view_reports_status_and_last_document() {
        let events = room_view(
            &view(Connection::Disconnected),
            None,
            Timestamp::from_millis(1),
            true,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("connection"));
        assert!(events[0].data.contains("disconnected"));
        assert!(events[1].data.contains("\"degraded\":true"));
    }

    #[test]
    fn handshake_names_the_viewer() {
        let viewer = PlayerId::parse("bob").unwrap();
        let event = handshake(&RoomId::parse("r1").unwrap(), Some(&viewer), false).unwrap();
        assert_eq!(event.event.as_deref(), Some("handshake"));
        assert!(event.data.contains("\"player_id\":\"bob\""));
    }
}
