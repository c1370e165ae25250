// MeshStore: typed tables on top of a StorageBackend
//
// Rows are JSON under `<table>/<id>` with zero-padded ids so a prefix scan
// returns them in insertion order. Position trails nest under their owner:
// `<table>/<owner>/<id>`. Ids come from a per-table counter starting at 1.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::backend::{MemoryStorage, SledStorage, StorageBackend};
use super::beacons::{
    BeaconPosition, BeaconSession, BeaconStatus, ReceivedBeacon, ReceivedBeaconPosition,
};
use super::history::StoredMessage;
use super::outbox::{OutboxEntry, OutboxStatus};
use super::StoreError;
use crate::message::Severity;

const MESSAGES: &str = "messages";
const OUTBOX: &str = "outbox";
const BEACON_SESSIONS: &str = "beacon_sessions";
const BEACON_POSITIONS: &str = "beacon_positions";
const RECEIVED_BEACONS: &str = "received_beacons";
const RECEIVED_POSITIONS: &str = "received_positions";

fn row_key(table: &str, id: u64) -> String {
    format!("{}/{:020}", table, id)
}

fn child_prefix(table: &str, owner: u64) -> String {
    format!("{}/{:020}/", table, owner)
}

fn position_key(table: &str, owner: u64, id: u64) -> String {
    format!("{}{:020}", child_prefix(table, owner), id)
}

#[derive(Clone)]
pub struct MeshStore {
    backend: Arc<dyn StorageBackend>,
}

impl MeshStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Open (or create) a sled database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(SledStorage::open(path)?)))
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.backend.flush()
    }

    // ------------------------------------------------------------------
    // Row plumbing
    // ------------------------------------------------------------------

    fn next_id(&self, table: &str) -> Result<u64, StoreError> {
        let key = format!("seq/{}", table);
        let current = match self.backend.get(key.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Serialization(format!("corrupt id counter for {}", table))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.backend.put(key.as_bytes(), &next.to_be_bytes())?;
        Ok(next)
    }

    fn put_row<T: Serialize>(&self, key: &str, row: &T) -> Result<(), StoreError> {
        let value = serde_json::to_vec(row)?;
        self.backend.put(key.as_bytes(), &value)
    }

    fn get_row<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.backend.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_rows<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        self.backend
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(StoreError::from))
            .collect()
    }

    fn require<T: DeserializeOwned>(&self, table: &'static str, id: u64) -> Result<T, StoreError> {
        self.get_row(&row_key(table, id))?
            .ok_or(StoreError::NotFound { table, id })
    }

    // ------------------------------------------------------------------
    // Message history
    // ------------------------------------------------------------------

    pub fn insert_message(&self, mut message: StoredMessage) -> Result<StoredMessage, StoreError> {
        message.id = self.next_id(MESSAGES)?;
        self.put_row(&row_key(MESSAGES, message.id), &message)?;
        Ok(message)
    }

    pub fn message(&self, id: u64) -> Result<Option<StoredMessage>, StoreError> {
        self.get_row(&row_key(MESSAGES, id))
    }

    /// Newest first
    pub fn messages(&self, limit: usize, offset: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let mut rows: Vec<StoredMessage> = self.scan_rows(&format!("{}/", MESSAGES))?;
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    pub fn message_count(&self) -> Result<usize, StoreError> {
        self.backend.count_prefix(format!("{}/", MESSAGES).as_bytes())
    }

    pub fn mark_read(&self, id: u64) -> Result<(), StoreError> {
        let mut message: StoredMessage = self.require(MESSAGES, id)?;
        message.is_read = true;
        self.put_row(&row_key(MESSAGES, id), &message)
    }

    pub fn set_pinned(&self, id: u64, pinned: bool) -> Result<(), StoreError> {
        let mut message: StoredMessage = self.require(MESSAGES, id)?;
        message.is_pinned = pinned;
        self.put_row(&row_key(MESSAGES, id), &message)
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    pub fn insert_outbox(
        &self,
        raw_string: &str,
        channel: Option<u32>,
        severity: Option<Severity>,
        created_at: u64,
    ) -> Result<OutboxEntry, StoreError> {
        let entry = OutboxEntry {
            id: self.next_id(OUTBOX)?,
            raw_string: raw_string.to_string(),
            channel,
            severity,
            created_at,
            status: OutboxStatus::Pending,
        };
        self.put_row(&row_key(OUTBOX, entry.id), &entry)?;
        Ok(entry)
    }

    pub fn outbox_entry(&self, id: u64) -> Result<Option<OutboxEntry>, StoreError> {
        self.get_row(&row_key(OUTBOX, id))
    }

    /// Every entry in insertion order, whatever its status
    pub fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        self.scan_rows(&format!("{}/", OUTBOX))
    }

    /// Pending entries by severity (unknown last), then age, then id
    pub fn pending_outbox(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut pending: Vec<OutboxEntry> = self
            .outbox_entries()?
            .into_iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .collect();
        pending.sort_by_key(|e| (e.severity.is_none(), e.severity, e.created_at, e.id));
        Ok(pending)
    }

    pub fn update_outbox_status(
        &self,
        id: u64,
        status: OutboxStatus,
    ) -> Result<OutboxEntry, StoreError> {
        let mut entry: OutboxEntry = self.require(OUTBOX, id)?;
        entry.status = status;
        self.put_row(&row_key(OUTBOX, id), &entry)?;
        Ok(entry)
    }

    pub fn delete_outbox(&self, id: u64) -> Result<(), StoreError> {
        self.backend.remove(row_key(OUTBOX, id).as_bytes())
    }

    // ------------------------------------------------------------------
    // Own beacon sessions
    // ------------------------------------------------------------------

    pub fn insert_beacon_session(
        &self,
        mut session: BeaconSession,
    ) -> Result<BeaconSession, StoreError> {
        session.id = self.next_id(BEACON_SESSIONS)?;
        self.put_row(&row_key(BEACON_SESSIONS, session.id), &session)?;
        Ok(session)
    }

    pub fn update_beacon_session(&self, session: &BeaconSession) -> Result<(), StoreError> {
        let _: BeaconSession = self.require(BEACON_SESSIONS, session.id)?;
        self.put_row(&row_key(BEACON_SESSIONS, session.id), session)
    }

    pub fn beacon_session(&self, id: u64) -> Result<Option<BeaconSession>, StoreError> {
        self.get_row(&row_key(BEACON_SESSIONS, id))
    }

    pub fn beacon_sessions(&self) -> Result<Vec<BeaconSession>, StoreError> {
        self.scan_rows(&format!("{}/", BEACON_SESSIONS))
    }

    /// Latest session still marked active, if any
    pub fn active_beacon_session(&self) -> Result<Option<BeaconSession>, StoreError> {
        Ok(self
            .beacon_sessions()?
            .into_iter()
            .rev()
            .find(BeaconSession::is_active))
    }

    pub fn insert_beacon_position(
        &self,
        mut position: BeaconPosition,
    ) -> Result<BeaconPosition, StoreError> {
        position.id = self.next_id(BEACON_POSITIONS)?;
        let key = position_key(BEACON_POSITIONS, position.session_id, position.id);
        self.put_row(&key, &position)?;
        Ok(position)
    }

    /// Save the session and append the position it was sent from in one write.
    /// On failure neither row changes.
    pub fn record_beacon_transmission(
        &self,
        session: &BeaconSession,
        mut position: BeaconPosition,
    ) -> Result<BeaconPosition, StoreError> {
        let _: BeaconSession = self.require(BEACON_SESSIONS, session.id)?;
        position.id = self.next_id(BEACON_POSITIONS)?;
        position.session_id = session.id;

        let rows = vec![
            (
                row_key(BEACON_SESSIONS, session.id).into_bytes(),
                serde_json::to_vec(session)?,
            ),
            (
                position_key(BEACON_POSITIONS, session.id, position.id).into_bytes(),
                serde_json::to_vec(&position)?,
            ),
        ];
        self.backend.put_batch(&rows)?;
        Ok(position)
    }

    pub fn beacon_positions(&self, session_id: u64) -> Result<Vec<BeaconPosition>, StoreError> {
        self.scan_rows(&child_prefix(BEACON_POSITIONS, session_id))
    }

    // ------------------------------------------------------------------
    // Beacons heard from other nodes
    // ------------------------------------------------------------------

    pub fn insert_received_beacon(
        &self,
        mut beacon: ReceivedBeacon,
    ) -> Result<ReceivedBeacon, StoreError> {
        beacon.id = self.next_id(RECEIVED_BEACONS)?;
        self.put_row(&row_key(RECEIVED_BEACONS, beacon.id), &beacon)?;
        Ok(beacon)
    }

    pub fn update_received_beacon(&self, beacon: &ReceivedBeacon) -> Result<(), StoreError> {
        let _: ReceivedBeacon = self.require(RECEIVED_BEACONS, beacon.id)?;
        self.put_row(&row_key(RECEIVED_BEACONS, beacon.id), beacon)
    }

    pub fn received_beacons(&self) -> Result<Vec<ReceivedBeacon>, StoreError> {
        self.scan_rows(&format!("{}/", RECEIVED_BEACONS))
    }

    pub fn active_received_beacon(
        &self,
        sender_node_id: &str,
    ) -> Result<Option<ReceivedBeacon>, StoreError> {
        Ok(self
            .received_beacons()?
            .into_iter()
            .find(|b| b.status == BeaconStatus::Active && b.sender_node_id == sender_node_id))
    }

    pub fn insert_received_position(
        &self,
        mut position: ReceivedBeaconPosition,
    ) -> Result<ReceivedBeaconPosition, StoreError> {
        position.id = self.next_id(RECEIVED_POSITIONS)?;
        let key = position_key(RECEIVED_POSITIONS, position.beacon_id, position.id);
        self.put_row(&key, &position)?;
        Ok(position)
    }

    pub fn received_positions(
        &self,
        beacon_id: u64,
    ) -> Result<Vec<ReceivedBeaconPosition>, StoreError> {
        self.scan_rows(&child_prefix(RECEIVED_POSITIONS, beacon_id))
    }
}
