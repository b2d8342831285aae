use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{
    Collection, Database,
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoRoomDocument, doc_id, versioned_doc_id},
};
use crate::{
    clock::Clock,
    dao::{
        hub::{RoomHub, RoomSubscription},
        models::{stamp_created, stamp_successor},
        room_store::{RoomMutator, RoomStore},
        storage::{StoreError, StoreResult},
    },
    state::room::{RoomDocument, RoomId},
};

const ROOM_COLLECTION_NAME: &str = "rooms";
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Room store backed by a MongoDB collection.
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
    hub: RoomHub,
    clock: Arc<dyn Clock>,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        info!("MongoDB connection re-established");
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB.
    pub async fn connect(config: MongoConfig, clock: Arc<dyn Clock>) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        info!(database = %config.database_name, "connected to MongoDB");
        Ok(Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
                hub: RoomHub::new(),
                clock,
            }),
        })
    }

    async fn collection(&self) -> Collection<MongoRoomDocument> {
        self.inner
            .database
            .read()
            .await
            .collection::<MongoRoomDocument>(ROOM_COLLECTION_NAME)
    }

    async fn load(&self, room_id: &RoomId) -> StoreResult<RoomDocument> {
        let document = self
            .collection()
            .await
            .find_one(doc_id(room_id))
            .await
            .map_err(|source| MongoDaoError::LoadRoom {
                room_id: room_id.clone(),
                source,
            })?
            .ok_or_else(|| StoreError::NotFound(room_id.clone()))?;
        document.into_room(room_id)
    }

    async fn insert(&self, room: RoomDocument) -> StoreResult<RoomDocument> {
        let room = stamp_created(room, self.inner.clock.now())?;
        let document = MongoRoomDocument::from_room(&room)?;

        match self.collection().await.insert_one(&document).await {
            Ok(_) => {}
            Err(err) if is_duplicate_key(&err) => {
                return Err(StoreError::AlreadyExists(room.room_id));
            }
            Err(source) => {
                return Err(MongoDaoError::InsertRoom {
                    room_id: room.room_id,
                    source,
                }
                .into());
            }
        }

        self.inner.hub.publish(&room);
        Ok(room)
    }

    async fn update(
        &self,
        room_id: RoomId,
        expected_version: u64,
        mutator: RoomMutator,
    ) -> StoreResult<RoomDocument> {
        let current = self.load(&room_id).await?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                room_id,
                expected: expected_version,
            });
        }

        let next = stamp_successor(&current, mutator(current.clone()), self.inner.clock.now())?;
        let document = MongoRoomDocument::from_room(&next)?;

        let result = self
            .collection()
            .await
            .replace_one(versioned_doc_id(&room_id, expected_version), &document)
            .await
            .map_err(|source| MongoDaoError::ReplaceRoom {
                room_id: room_id.clone(),
                source,
            })?;

        if result.matched_count == 0 {
            debug!(%room_id, expected_version, "lost conditional write race");
            return Err(StoreError::VersionConflict {
                room_id,
                expected: expected_version,
            });
        }

        self.inner.hub.publish(&next);
        Ok(next)
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY_CODE
    )
}

impl RoomStore for MongoRoomStore {
    fn create(&self, room: RoomDocument) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.insert(room).await })
    }

    fn fetch(&self, room_id: RoomId) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.load(&room_id).await })
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
        Box::pin(async move { store.update(room_id, expected_version, mutator).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }

    fn announce_connectivity(&self, online: bool) {
        self.inner.hub.announce(online, "MongoDB unreachable");
    }
}
