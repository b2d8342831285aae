use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchRoomDocument, room_doc_id},
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

/// Room store backed by a CouchDB database.
#[derive(Clone)]
pub struct CouchRoomStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    hub: Arc<RoomHub>,
    clock: Arc<dyn Clock>,
}

/// Outcome of a document write.
enum PutOutcome {
    Stored,
    Conflict,
}

impl CouchRoomStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig, clock: Arc<dyn Clock>) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            hub: Arc::new(RoomHub::new()),
            clock,
        };

        store.ensure_database().await?;
        info!(database = %store.database, "connected to CouchDB");
        Ok(store)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    info!(%database, "created CouchDB database");
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn ping(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            })
        }
    }

    async fn load(&self, room_id: &RoomId) -> StoreResult<(RoomDocument, Option<String>)> {
        let doc_id = room_doc_id(room_id);
        let response = self
            .request(Method::GET, &doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(room_id.clone())),
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|source| CouchDaoError::ReadResponse {
                        path: doc_id.clone(),
                        source,
                    })?;
                CouchRoomDocument::decode(room_id, &body)
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id,
                status: other,
            }
            .into()),
        }
    }

    async fn put(&self, document: &CouchRoomDocument) -> CouchResult<PutOutcome> {
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: document.id.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Stored),
            other => Err(CouchDaoError::RequestStatus {
                path: document.id.clone(),
                status: other,
            }),
        }
    }

    async fn insert(&self, room: RoomDocument) -> StoreResult<RoomDocument> {
        let room = stamp_created(room, self.clock.now())?;
        let document = CouchRoomDocument::new(room, None);
        match self.put(&document).await? {
            PutOutcome::Stored => {
                self.hub.publish(&document.room);
                Ok(document.room)
            }
            PutOutcome::Conflict => Err(StoreError::AlreadyExists(document.room.room_id)),
        }
    }

    async fn update(
        &self,
        room_id: RoomId,
        expected_version: u64,
        mutator: RoomMutator,
    ) -> StoreResult<RoomDocument> {
        let (current, rev) = self.load(&room_id).await?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                room_id,
                expected: expected_version,
            });
        }

        let next = stamp_successor(&current, mutator(current.clone()), self.clock.now())?;
        let document = CouchRoomDocument::new(next, rev);
        match self.put(&document).await? {
            PutOutcome::Stored => {
                self.hub.publish(&document.room);
                Ok(document.room)
            }
            PutOutcome::Conflict => {
                debug!(%room_id, expected_version, "CouchDB revision moved underneath");
                Err(StoreError::VersionConflict {
                    room_id,
                    expected: expected_version,
                })
            }
        }
    }
}

impl RoomStore for CouchRoomStore {
    fn create(&self, room: RoomDocument) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.insert(room).await })
    }

    fn fetch(&self, room_id: RoomId) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.load(&room_id).await.map(|(room, _)| room) })
    }

    fn subscribe(&self, room_id: &RoomId) -> RoomSubscription {
        self.hub.subscribe(room_id)
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
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }

    fn announce_connectivity(&self, online: bool) {
        self.hub.announce(online, "CouchDB unreachable");
    }
}
