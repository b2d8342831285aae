mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchRoomStore;

use crate::dao::storage::StoreError;

impl From<CouchDaoError> for StoreError {
    fn from(err: CouchDaoError) -> Self {
        StoreError::unavailable(err.to_string(), err)
    }
}
