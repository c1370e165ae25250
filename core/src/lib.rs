// MECP Core: offline-first mesh emergency messaging
//
// Protocol codec, duplicate suppression, store-and-forward outbox and the
// distress beacon state machine. Radio adapters, UI and location services
// live outside this crate and reach it through `transport` and `node`.

pub mod beacon;
pub mod clock;
pub mod message;
pub mod node;
pub mod settings;
pub mod store;
pub mod transport;

use thiserror::Error;

pub use beacon::{
    AckLoop, AckState, BeaconError, BeaconMachine, BeaconScheduler, ReceivedBeaconTracker,
    TransmissionOutcome,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use message::{
    decode, encode, is_mecp, validate, EncodeResult, GpsFix, ParsedMessage, Severity,
    ValidationResult,
};
pub use node::{Delivery, Inbound, MeshNode, NodeEvent, SendOutcome};
pub use settings::{MeshSettings, SettingsError};
pub use store::{Deduplicator, MeshStore, OutboxQueue, StoreError};
pub use transport::{MeshTransport, TransportError, TransportManager, TransportStatus};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Beacon error: {0}")]
    Beacon(#[from] BeaconError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl CoreError {
    /// True when the error is a violated beacon precondition rather than an I/O fault.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CoreError::Beacon(BeaconError::AlreadyActive(_))
                | CoreError::Beacon(BeaconError::NoActiveSession)
        )
    }
}
