/// In-process fan-out of room change notifications.
pub mod hub;
/// Persisted form of room documents.
pub mod models;
/// Room store abstraction and its backends.
pub mod room_store;
/// Storage error taxonomy.
pub mod storage;
