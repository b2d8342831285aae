use mongodb::error::Error as MongoError;
use thiserror::Error;

use crate::state::room::RoomId;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised while talking to MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Required environment variable is missing.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The driver refused the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered the initial ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Attempts made.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// The periodic ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Inserting a new room failed.
    #[error("failed to insert room `{room_id}`")]
    InsertRoom {
        /// Room being created.
        room_id: RoomId,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Loading a room failed.
    #[error("failed to load room `{room_id}`")]
    LoadRoom {
        /// Room being read.
        room_id: RoomId,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Replacing a room failed.
    #[error("failed to replace room `{room_id}`")]
    ReplaceRoom {
        /// Room being written.
        room_id: RoomId,
        /// Driver error.
        #[source]
        source: MongoError,
    },
}
