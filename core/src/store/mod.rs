// Store module: persistence, outbox and duplicate suppression

pub mod backend;
pub mod beacons;
pub mod database;
pub mod dedup;
pub mod history;
pub mod outbox;

use thiserror::Error;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use beacons::{
    BeaconPosition, BeaconSession, BeaconStatus, ReceivedBeacon, ReceivedBeaconPosition,
};
pub use database::MeshStore;
pub use dedup::{make_key, Deduplicator, DEFAULT_DEDUP_WINDOW};
pub use history::{MessageDirection, StoredMessage};
pub use outbox::{DrainReport, OutboxEntry, OutboxQueue, OutboxStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("No {table} row with id {id}")]
    NotFound { table: &'static str, id: u64 },
    #[error("Outbox entry {id} is {status}, only failed entries can be retried")]
    NotRetryable { id: u64, status: OutboxStatus },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
