//! Transport abstraction layer for MECP
//!
//! A radio adapter (Meshtastic, MeshCore, an in-process loopback) exposes
//! connect/send plus two event streams. The core never talks to a radio
//! directly, only through [`MeshTransport`].

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Connection state of the radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportStatus::Disconnected => write!(f, "disconnected"),
            TransportStatus::Connecting => write!(f, "connecting"),
            TransportStatus::Connected => write!(f, "connected"),
            TransportStatus::Error => write!(f, "error"),
        }
    }
}

/// Mesh firmware family a node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshPlatform {
    Meshtastic,
    MeshCore,
}

/// Who sent a frame, as reported by the radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub display_name: String,
    pub short_name: Option<String>,
    pub node_id: String,
    pub platform: MeshPlatform,
}

impl SenderIdentity {
    pub fn new(
        node_id: impl Into<String>,
        display_name: impl Into<String>,
        platform: MeshPlatform,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            short_name: None,
            node_id: node_id.into(),
            platform,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalQuality {
    pub rssi: i32,
    pub snr: f32,
}

/// A text frame delivered by the radio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub text: String,
    pub sender: SenderIdentity,
    pub channel: Option<String>,
    pub timestamp: u64,
    pub signal: Option<SignalQuality>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,
    #[error("No transport adapter configured")]
    NoAdapter,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
}

pub type MessageCallback = Arc<dyn Fn(&IncomingMessage) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(TransportStatus) + Send + Sync>;

/// Radio adapter contract
#[async_trait]
pub trait MeshTransport: Send + Sync {
    async fn connect(&self, device_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    /// Fails with `NotConnected` when the link is down, or `SendFailed` on radio error
    async fn send_text(&self, text: &str, channel: Option<u32>) -> Result<(), TransportError>;
    fn on_message(&self, callback: MessageCallback) -> Subscription;
    fn on_status_change(&self, callback: StatusCallback) -> Subscription;
    fn status(&self) -> TransportStatus;
    fn nodes(&self) -> Vec<SenderIdentity>;

    fn is_connected(&self) -> bool {
        self.status() == TransportStatus::Connected
    }
}

/// Handle returned by listener registration. Call `unsubscribe` to detach.
///
/// Dropping the handle leaves the listener attached.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription with nothing to detach
    pub fn noop() -> Self {
        Self { detach: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

struct ListenerTable<T: ?Sized> {
    next_id: u64,
    callbacks: BTreeMap<u64, Arc<T>>,
}

/// Registry of callbacks shared by an adapter and its subscriptions
pub struct Listeners<T: ?Sized> {
    table: Arc<RwLock<ListenerTable<T>>>,
}

impl<T: ?Sized> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            table: Arc::new(RwLock::new(ListenerTable {
                next_id: 0,
                callbacks: BTreeMap::new(),
            })),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: Arc<T>) -> Subscription {
        let id = {
            let mut table = self.table.write();
            let id = table.next_id;
            table.next_id += 1;
            table.callbacks.insert(id, callback);
            id
        };
        let weak: Weak<RwLock<ListenerTable<T>>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = weak.upgrade() {
                table.write().callbacks.remove(&id);
            }
        })
    }

    /// Current callbacks, so emitters never hold the lock while calling out
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.table.read().callbacks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Listeners<dyn Fn(&IncomingMessage) + Send + Sync> {
    pub fn emit(&self, message: &IncomingMessage) {
        for callback in self.snapshot() {
            callback(message);
        }
    }
}

impl Listeners<dyn Fn(TransportStatus) + Send + Sync> {
    pub fn emit(&self, status: TransportStatus) {
        for callback in self.snapshot() {
            callback(status);
        }
    }
}

pub type MessageListeners = Listeners<dyn Fn(&IncomingMessage) + Send + Sync>;
pub type StatusListeners = Listeners<dyn Fn(TransportStatus) + Send + Sync>;
