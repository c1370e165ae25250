// Beacons heard from other nodes
//
// One active row per sender. Repeated beacons refresh it and extend its
// position trail; a B03 from the sender closes it. No timers on this side.

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::message::GpsFix;
use crate::store::{BeaconStatus, MeshStore, ReceivedBeacon, ReceivedBeaconPosition, StoreError};

pub struct ReceivedBeaconTracker {
    store: MeshStore,
    clock: Arc<dyn Clock>,
}

impl ReceivedBeaconTracker {
    pub fn new(store: MeshStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn process_incoming_beacon(
        &self,
        sender_node_id: &str,
        sender_display_name: Option<&str>,
        codes_summary: &str,
        is_drill: bool,
        position: Option<GpsFix>,
    ) -> Result<ReceivedBeacon, StoreError> {
        let now = self.clock.now_ms();

        let beacon = match self.store.active_received_beacon(sender_node_id)? {
            Some(mut existing) => {
                existing.last_seen = now;
                existing.last_codes = codes_summary.to_string();
                if let Some(name) = sender_display_name {
                    existing.sender_display_name = Some(name.to_string());
                }
                self.store.update_received_beacon(&existing)?;
                debug!("Beacon from {} refreshed", sender_node_id);
                existing
            }
            None => {
                let beacon = self.store.insert_received_beacon(ReceivedBeacon {
                    id: 0,
                    sender_node_id: sender_node_id.to_string(),
                    sender_display_name: sender_display_name.map(str::to_string),
                    first_seen: now,
                    last_seen: now,
                    last_codes: codes_summary.to_string(),
                    is_drill,
                    status: BeaconStatus::Active,
                })?;
                info!(
                    "New beacon from {}{}",
                    sender_node_id,
                    if is_drill { " (drill)" } else { "" }
                );
                beacon
            }
        };

        if let Some(fix) = position {
            self.store.insert_received_position(ReceivedBeaconPosition {
                id: 0,
                beacon_id: beacon.id,
                lat: fix.lat,
                lon: fix.lon,
                timestamp: now,
            })?;
        }

        Ok(beacon)
    }

    /// Close the sender's active beacon. `None` if there was nothing to close.
    pub fn process_beacon_cancel(
        &self,
        sender_node_id: &str,
    ) -> Result<Option<ReceivedBeacon>, StoreError> {
        let Some(mut beacon) = self.store.active_received_beacon(sender_node_id)? else {
            return Ok(None);
        };
        beacon.status = BeaconStatus::Completed;
        beacon.last_seen = self.clock.now_ms();
        self.store.update_received_beacon(&beacon)?;
        info!("Beacon from {} cancelled by sender", sender_node_id);
        Ok(Some(beacon))
    }

    pub fn active_beacons(&self) -> Result<Vec<ReceivedBeacon>, StoreError> {
        Ok(self
            .store
            .received_beacons()?
            .into_iter()
            .filter(|b| b.status == BeaconStatus::Active)
            .collect())
    }

    pub fn positions(&self, beacon_id: u64) -> Result<Vec<ReceivedBeaconPosition>, StoreError> {
        self.store.received_positions(beacon_id)
    }
}
