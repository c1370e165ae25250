// Outbox: store-and-forward queue for messages composed while offline
//
// Entries are persisted before anything else happens. A drain sends pending
// entries in priority order while the radio stays connected, mirroring each
// delivered entry into message history.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::database::MeshStore;
use super::history::StoredMessage;
use super::StoreError;
use crate::clock::Clock;
use crate::message::Severity;
use crate::transport::{MeshTransport, TransportStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sending => "sending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A queued outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: u64,
    pub raw_string: String,
    pub channel: Option<u32>,
    pub severity: Option<Severity>,
    pub created_at: u64,
    pub status: OutboxStatus,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
    /// Still pending when the pass ended (link dropped, or enqueued meanwhile)
    pub remaining: usize,
}

/// Resets the draining flag on every exit path
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OutboxQueue {
    store: MeshStore,
    clock: Arc<dyn Clock>,
    draining: AtomicBool,
}

impl OutboxQueue {
    pub fn new(store: MeshStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            draining: AtomicBool::new(false),
        }
    }

    pub fn enqueue(
        &self,
        raw_string: &str,
        channel: Option<u32>,
        severity: Option<Severity>,
    ) -> Result<OutboxEntry, StoreError> {
        let entry = self
            .store
            .insert_outbox(raw_string, channel, severity, self.clock.now_ms())?;
        debug!("Queued outbox entry {} ({:?})", entry.id, severity);
        Ok(entry)
    }

    /// Put a failed entry back in the queue
    pub fn retry(&self, id: u64) -> Result<OutboxEntry, StoreError> {
        let entry = self
            .store
            .outbox_entry(id)?
            .ok_or(StoreError::NotFound { table: "outbox", id })?;
        if entry.status != OutboxStatus::Failed {
            return Err(StoreError::NotRetryable {
                id,
                status: entry.status,
            });
        }
        self.store.update_outbox_status(id, OutboxStatus::Pending)
    }

    /// Return entries left `Sending` by an interrupted drain to the queue.
    ///
    /// Only call this while no drain is running, i.e. at startup.
    pub fn recover_interrupted(&self) -> Result<usize, StoreError> {
        if self.is_draining() {
            return Ok(0);
        }
        let mut recovered = 0;
        for entry in self.store.outbox_entries()? {
            if entry.status == OutboxStatus::Sending {
                self.store.update_outbox_status(entry.id, OutboxStatus::Pending)?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!("Requeued {} outbox entries interrupted mid-send", recovered);
        }
        Ok(recovered)
    }

    pub fn pending(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        self.store.pending_outbox()
    }

    pub fn entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        self.store.outbox_entries()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Send pending entries through `transport` in priority order.
    ///
    /// Returns `None` without touching anything when a drain is already
    /// running or the link is down.
    pub async fn drain(
        &self,
        transport: &dyn MeshTransport,
    ) -> Result<Option<DrainReport>, StoreError> {
        if transport.status() != TransportStatus::Connected {
            return Ok(None);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Outbox drain already in progress");
            return Ok(None);
        }
        let _guard = DrainGuard(&self.draining);

        let pending = self.store.pending_outbox()?;
        if pending.is_empty() {
            return Ok(Some(DrainReport::default()));
        }
        info!("Draining {} outbox entries", pending.len());

        let mut report = DrainReport::default();
        for entry in pending {
            if transport.status() != TransportStatus::Connected {
                info!("Link lost during drain, leaving remaining entries pending");
                break;
            }

            self.store.update_outbox_status(entry.id, OutboxStatus::Sending)?;
            match transport.send_text(&entry.raw_string, entry.channel).await {
                Ok(()) => {
                    self.store.update_outbox_status(entry.id, OutboxStatus::Sent)?;
                    let record =
                        StoredMessage::sent(&entry.raw_string, entry.channel, self.clock.now_ms());
                    self.store.insert_message(record)?;
                    report.sent += 1;
                }
                Err(e) => {
                    warn!("Outbox entry {} failed: {}", entry.id, e);
                    self.store.update_outbox_status(entry.id, OutboxStatus::Failed)?;
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.store.pending_outbox()?.len();
        info!(
            "Outbox drain finished: {} sent, {} failed, {} remaining",
            report.sent, report.failed, report.remaining
        );
        Ok(Some(report))
    }
}
