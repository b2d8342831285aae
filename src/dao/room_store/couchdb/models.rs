use serde::{Deserialize, Serialize};

use crate::{
    dao::{
        models::verify_room,
        storage::{StoreError, StoreResult},
    },
    state::room::{RoomDocument, RoomId},
};

pub const ROOM_PREFIX: &str = "room::";

/// A room as stored in CouchDB; `_rev` drives optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub room: RoomDocument,
}

impl CouchRoomDocument {
    pub fn new(room: RoomDocument, rev: Option<String>) -> Self {
        Self {
            id: room_doc_id(&room.room_id),
            rev,
            room,
        }
    }

    /// Decode a raw response body, reporting anything unexpected as corruption.
    pub fn decode(room_id: &RoomId, body: &str) -> StoreResult<(RoomDocument, Option<String>)> {
        let document: Self =
            serde_json::from_str(body).map_err(|err| StoreError::corrupt(room_id, err))?;
        if document.id != room_doc_id(room_id) {
            return Err(StoreError::corrupt(
                room_id,
                format!("document id `{}` does not match", document.id),
            ));
        }
        let room = verify_room(room_id, document.room)?;
        Ok((room, document.rev))
    }
}

pub fn room_doc_id(room_id: &RoomId) -> String {
    format!("{}{}", ROOM_PREFIX, room_id)
}
