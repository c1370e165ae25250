// Beacon module: own distress beacon, ACK wait and beacons heard from others

pub mod ack;
pub mod received;
pub mod schedule;
pub mod session;

use thiserror::Error;

use crate::store::StoreError;

pub use ack::{AckLoop, AckSender, AckState, DEFAULT_ACK_TIMEOUT};
pub use received::ReceivedBeaconTracker;
pub use schedule::{BeaconScheduler, BeaconTick, BeaconTicks, IntervalTrigger, ManualTrigger};
pub use session::{
    beacon_interval_minutes, BeaconMachine, TransmissionOutcome, DEFAULT_DRILL_MAX_TRANSMITS,
};

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("A beacon is already active (session {0})")]
    AlreadyActive(u64),
    #[error("No active beacon session")]
    NoActiveSession,
    #[error(transparent)]
    Store(#[from] StoreError),
}
