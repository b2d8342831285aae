//! Persisted form of room documents shared by every backend.

use crate::{
    dao::storage::{StoreError, StoreResult},
    state::room::{RoomDocument, RoomId, Timestamp},
};

/// Serialize a room for storage.
pub fn encode_room(room: &RoomDocument) -> StoreResult<String> {
    serde_json::to_string(room).map_err(|err| StoreError::corrupt(&room.room_id, err))
}

/// Decode a stored payload, re-checking every invariant.
///
/// Never repairs: anything that does not decode into a valid document for
/// `room_id` is reported as corrupt.
pub fn decode_room(room_id: &RoomId, payload: &str) -> StoreResult<RoomDocument> {
    let room: RoomDocument =
        serde_json::from_str(payload).map_err(|err| StoreError::corrupt(room_id, err))?;
    verify_room(room_id, room)
}

/// Re-check a document that was decoded by a backend-specific codec.
pub fn verify_room(room_id: &RoomId, room: RoomDocument) -> StoreResult<RoomDocument> {
    if &room.room_id != room_id {
        return Err(StoreError::corrupt(
            room_id,
            format!("payload belongs to room `{}`", room.room_id),
        ));
    }
    room.validate()
        .map_err(|err| StoreError::corrupt(room_id, err))?;
    Ok(room)
}

/// Prepare a freshly created room for its first write.
pub fn stamp_created(mut room: RoomDocument, now: Timestamp) -> StoreResult<RoomDocument> {
    room.version = 1;
    room.updated_at = now.max(room.created_at);
    room.validate().map_err(|source| StoreError::InvalidWrite {
        room_id: room.room_id.clone(),
        source,
    })?;
    Ok(room)
}

/// Stamp `next` as the successor of `current` and check it may replace it.
pub fn stamp_successor(
    current: &RoomDocument,
    mut next: RoomDocument,
    now: Timestamp,
) -> StoreResult<RoomDocument> {
    next.version = current.version + 1;
    next.updated_at = now.max(current.updated_at);
    current
        .verify_successor(&next)
        .map_err(|source| StoreError::InvalidWrite {
            room_id: current.room_id.clone(),
            source,
        })?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{Language, RoomRules, RoomSettings, RoomStatus};

    fn room() -> RoomDocument {
        let settings = RoomSettings::from_rules(
            RoomRules {
                rounds_total: 1,
                time_per_round_seconds: 10,
                categories: vec!["Animal".into()],
                language: Language::Fr,
                end_round_on_first_submit: true,
            },
            "admin",
        )
        .unwrap();
        RoomDocument::new(
            RoomId::parse("r1").unwrap(),
            settings,
            "Ada",
            Timestamp::from_millis(100),
        )
        .unwrap()
    }

    #[test]
    fn decode_rejects_invariant_violations() {
        let mut broken = room();
        broken.status = RoomStatus::Finished;
        let payload = serde_json::to_string(&broken).unwrap();
        let err = decode_room(&broken.room_id, &payload).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn decode_rejects_foreign_room() {
        let payload = encode_room(&room()).unwrap();
        let other = RoomId::parse("r2").unwrap();
        assert!(matches!(
            decode_room(&other, &payload),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        let id = RoomId::parse("r1").unwrap();
        assert!(matches!(
            decode_room(&id, "{\"room_id\": 3}"),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn successor_is_versioned_and_never_goes_back_in_time() {
        let current = stamp_created(room(), Timestamp::from_millis(500)).unwrap();
        assert_eq!(current.version, 1);

        let next = stamp_successor(&current, current.clone(), Timestamp::from_millis(200)).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.updated_at, Timestamp::from_millis(500));
    }
}
