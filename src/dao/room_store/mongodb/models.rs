use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::{
    dao::{
        models::{decode_room, encode_room},
        storage::{StoreError, StoreResult},
    },
    state::room::{RoomDocument, RoomId},
};

/// Shape of a room inside the `rooms` collection.
///
/// `version` is duplicated next to the payload so conditional writes can filter on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    id: String,
    version: i64,
    updated_at: DateTime,
    payload: String,
}

impl MongoRoomDocument {
    pub fn from_room(room: &RoomDocument) -> StoreResult<Self> {
        Ok(Self {
            id: room.room_id.to_string(),
            version: version_as_i64(room.version),
            updated_at: DateTime::from_millis(room.updated_at.as_millis()),
            payload: encode_room(room)?,
        })
    }

    pub fn into_room(self, room_id: &RoomId) -> StoreResult<RoomDocument> {
        let room = decode_room(room_id, &self.payload)?;
        if version_as_i64(room.version) != self.version {
            return Err(StoreError::corrupt(
                room_id,
                format!(
                    "payload version {} disagrees with stored version {}",
                    room.version, self.version
                ),
            ));
        }
        Ok(room)
    }
}

pub fn version_as_i64(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

pub fn doc_id(room_id: &RoomId) -> Document {
    doc! {"_id": room_id.as_str()}
}

pub fn versioned_doc_id(room_id: &RoomId, version: u64) -> Document {
    doc! {"_id": room_id.as_str(), "version": version_as_i64(version)}
}
