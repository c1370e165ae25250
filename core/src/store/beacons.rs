// Beacon rows: own sessions, received beacons and their position trails

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::message::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconStatus {
    Active,
    Completed,
}

impl fmt::Display for BeaconStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeaconStatus::Active => f.write_str("active"),
            BeaconStatus::Completed => f.write_str("completed"),
        }
    }
}

/// A distress beacon this node is (or was) transmitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconSession {
    pub id: u64,
    pub original_codes: Vec<String>,
    pub original_freetext: Option<String>,
    pub severity: Severity,
    pub is_drill: bool,
    pub started_at: u64,
    pub acknowledged_at: Option<u64>,
    pub cancelled_at: Option<u64>,
    pub ack_node_id: Option<String>,
    pub ack_display_name: Option<String>,
    pub interval_minutes: u32,
    pub transmit_count: u32,
    /// Set for drills only
    pub max_transmits: Option<u32>,
    pub status: BeaconStatus,
}

impl BeaconSession {
    pub fn is_active(&self) -> bool {
        self.status == BeaconStatus::Active
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeaconPosition {
    pub id: u64,
    pub session_id: u64,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: u64,
}

/// A beacon heard from another node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedBeacon {
    pub id: u64,
    pub sender_node_id: String,
    pub sender_display_name: Option<String>,
    pub first_seen: u64,
    pub last_seen: u64,
    pub last_codes: String,
    pub is_drill: bool,
    pub status: BeaconStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceivedBeaconPosition {
    pub id: u64,
    pub beacon_id: u64,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: u64,
}
