//! Transport manager: stable facade over the currently bound adapter
//!
//! The node subscribes once to the manager. Swapping the adapter (a different
//! radio, or none) moves the forwarding subscriptions without the node
//! having to re-register.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::abstraction::{
    IncomingMessage, MeshTransport, MessageCallback, MessageListeners, SenderIdentity,
    StatusCallback, StatusListeners, Subscription, TransportError, TransportStatus,
};

pub struct TransportManager {
    adapter: RwLock<Option<Arc<dyn MeshTransport>>>,
    forwarding: Mutex<Vec<Subscription>>,
    messages: MessageListeners,
    statuses: StatusListeners,
}

impl Default for TransportManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportManager {
    pub fn new() -> Self {
        Self {
            adapter: RwLock::new(None),
            forwarding: Mutex::new(Vec::new()),
            messages: MessageListeners::new(),
            statuses: StatusListeners::new(),
        }
    }

    /// Bind a radio adapter, replacing any previous one
    pub fn set_adapter(&self, adapter: Arc<dyn MeshTransport>) {
        self.detach_forwarding();

        let messages = self.messages.clone();
        let on_message = adapter.on_message(Arc::new(move |msg: &IncomingMessage| {
            messages.emit(msg);
        }));
        let statuses = self.statuses.clone();
        let on_status = adapter.on_status_change(Arc::new(move |status: TransportStatus| {
            debug!("Transport status changed: {}", status);
            statuses.emit(status);
        }));
        self.forwarding.lock().extend([on_message, on_status]);

        let status = adapter.status();
        *self.adapter.write() = Some(adapter);
        info!("Transport adapter bound ({})", status);
        self.statuses.emit(status);
    }

    /// Unbind the adapter. Listeners stay registered on the manager.
    pub fn clear_adapter(&self) {
        self.detach_forwarding();
        if self.adapter.write().take().is_some() {
            self.statuses.emit(TransportStatus::Disconnected);
        }
    }

    pub fn has_adapter(&self) -> bool {
        self.adapter.read().is_some()
    }

    fn detach_forwarding(&self) {
        let subs: Vec<Subscription> = self.forwarding.lock().drain(..).collect();
        for sub in subs {
            sub.unsubscribe();
        }
    }

    fn current(&self) -> Option<Arc<dyn MeshTransport>> {
        self.adapter.read().clone()
    }
}

#[async_trait]
impl MeshTransport for TransportManager {
    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        let adapter = self.current().ok_or(TransportError::NoAdapter)?;
        adapter.connect(device_id).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match self.current() {
            Some(adapter) => adapter.disconnect().await,
            None => Ok(()),
        }
    }

    async fn send_text(&self, text: &str, channel: Option<u32>) -> Result<(), TransportError> {
        let adapter = self.current().ok_or(TransportError::NoAdapter)?;
        adapter.send_text(text, channel).await
    }

    fn on_message(&self, callback: MessageCallback) -> Subscription {
        self.messages.add(callback)
    }

    fn on_status_change(&self, callback: StatusCallback) -> Subscription {
        self.statuses.add(callback)
    }

    fn status(&self) -> TransportStatus {
        self.current()
            .map(|a| a.status())
            .unwrap_or(TransportStatus::Disconnected)
    }

    fn nodes(&self) -> Vec<SenderIdentity> {
        self.current().map(|a| a.nodes()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackTransport, MeshPlatform};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_no_adapter() {
        let manager = TransportManager::new();
        assert_eq!(manager.status(), TransportStatus::Disconnected);
        assert_eq!(
            manager.send_text("MECP/3/L01", None).await,
            Err(TransportError::NoAdapter)
        );
        assert!(manager.disconnect().await.is_ok());
        assert!(manager.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_forwards_adapter_events() {
        let manager = TransportManager::new();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let seen = statuses.clone();
        let _status_sub = manager.on_status_change(Arc::new(move |s: TransportStatus| {
            seen.lock().push(s);
        }));
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let _msg_sub = manager.on_message(Arc::new(move |_m: &IncomingMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let radio = LoopbackTransport::shared();
        manager.set_adapter(radio.clone());
        manager.connect("loop-0").await.unwrap();
        radio.inject(IncomingMessage {
            text: "MECP/3/L01".into(),
            sender: SenderIdentity::new("!a", "A", MeshPlatform::Meshtastic),
            channel: None,
            timestamp: 1,
            signal: None,
        });

        assert_eq!(
            *statuses.lock(),
            vec![
                TransportStatus::Disconnected,
                TransportStatus::Connecting,
                TransportStatus::Connected,
            ]
        );
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(manager.nodes().len(), 1);
    }

    #[tokio::test]
    async fn test_swapping_adapter_stops_old_events() {
        let manager = TransportManager::new();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let _sub = manager.on_message(Arc::new(move |_m: &IncomingMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let old = LoopbackTransport::shared();
        manager.set_adapter(old.clone());
        manager.set_adapter(LoopbackTransport::shared());

        old.inject(IncomingMessage {
            text: "stale".into(),
            sender: SenderIdentity::new("!a", "A", MeshPlatform::Meshtastic),
            channel: None,
            timestamp: 1,
            signal: None,
        });
        assert_eq!(received.load(Ordering::SeqCst), 0);
    }
}
