// Transport module: radio adapter contract, manager facade and loopback radio

pub mod abstraction;
pub mod loopback;
pub mod manager;
pub mod nodes;

pub use abstraction::{
    IncomingMessage, Listeners, MeshPlatform, MeshTransport, MessageCallback, MessageListeners,
    SenderIdentity, SignalQuality, StatusCallback, StatusListeners, Subscription,
    TransportError, TransportStatus,
};
pub use loopback::{LoopbackTransport, SentFrame};
pub use manager::TransportManager;
pub use nodes::{KnownNode, NodeDirectory};
