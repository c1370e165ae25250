// Loopback transport: an in-process radio
//
// Frames sent are recorded instead of transmitted, and inbound frames are
// injected by the host. Used by tests and the CLI demo. Failures and link
// loss can be scripted to exercise the outbox.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::abstraction::{
    IncomingMessage, MeshTransport, MessageCallback, MessageListeners, SenderIdentity,
    StatusCallback, StatusListeners, Subscription, TransportError, TransportStatus,
};
use super::nodes::NodeDirectory;

/// A frame accepted by `send_text`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub text: String,
    pub channel: Option<u32>,
}

#[derive(Debug)]
struct LinkState {
    status: TransportStatus,
    device_id: Option<String>,
    sent: Vec<SentFrame>,
    failures_remaining: usize,
    sends_until_drop: Option<usize>,
}

pub struct LoopbackTransport {
    link: Mutex<LinkState>,
    directory: Mutex<NodeDirectory>,
    messages: MessageListeners,
    statuses: StatusListeners,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            link: Mutex::new(LinkState {
                status: TransportStatus::Disconnected,
                device_id: None,
                sent: Vec::new(),
                failures_remaining: 0,
                sends_until_drop: None,
            }),
            directory: Mutex::new(NodeDirectory::new()),
            messages: MessageListeners::new(),
            statuses: StatusListeners::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn set_status(&self, status: TransportStatus) {
        {
            let mut link = self.link.lock();
            if link.status == status {
                return;
            }
            link.status = status;
        }
        debug!("Loopback link {}", status);
        self.statuses.emit(status);
    }

    /// Simulate the radio dropping the link
    pub fn drop_link(&self) {
        self.set_status(TransportStatus::Disconnected);
    }

    /// Deliver a frame as if it arrived over the air
    pub fn inject(&self, message: IncomingMessage) {
        self.directory
            .lock()
            .upsert(&message.sender, message.timestamp);
        self.messages.emit(&message);
    }

    /// Frames accepted so far, oldest first
    pub fn sent(&self) -> Vec<SentFrame> {
        self.link.lock().sent.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.link.lock().sent.iter().map(|f| f.text.clone()).collect()
    }

    /// Make the next `n` sends fail with a radio error
    pub fn fail_next_sends(&self, n: usize) {
        self.link.lock().failures_remaining = n;
    }

    /// Drop the link right after `n` more successful sends
    pub fn disconnect_after_sends(&self, n: usize) {
        self.link.lock().sends_until_drop = Some(n);
    }

    pub fn device_id(&self) -> Option<String> {
        self.link.lock().device_id.clone()
    }
}

#[async_trait]
impl MeshTransport for LoopbackTransport {
    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        self.set_status(TransportStatus::Connecting);
        self.link.lock().device_id = Some(device_id.to_string());
        self.set_status(TransportStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.link.lock().device_id = None;
        self.set_status(TransportStatus::Disconnected);
        Ok(())
    }

    async fn send_text(&self, text: &str, channel: Option<u32>) -> Result<(), TransportError> {
        let drop_now = {
            let mut link = self.link.lock();
            if link.status != TransportStatus::Connected {
                return Err(TransportError::NotConnected);
            }
            if link.failures_remaining > 0 {
                link.failures_remaining -= 1;
                return Err(TransportError::SendFailed("simulated radio failure".into()));
            }
            link.sent.push(SentFrame {
                text: text.to_string(),
                channel,
            });
            match link.sends_until_drop.as_mut() {
                Some(remaining) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                None => false,
            }
        };

        if drop_now {
            self.link.lock().sends_until_drop = None;
            self.drop_link();
        }
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) -> Subscription {
        self.messages.add(callback)
    }

    fn on_status_change(&self, callback: StatusCallback) -> Subscription {
        self.statuses.add(callback)
    }

    fn status(&self) -> TransportStatus {
        self.link.lock().status
    }

    fn nodes(&self) -> Vec<SenderIdentity> {
        self.directory
            .lock()
            .all()
            .into_iter()
            .map(|n| n.identity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MeshPlatform;

    #[tokio::test]
    async fn test_send_requires_connection() {
        let radio = LoopbackTransport::new();
        assert_eq!(
            radio.send_text("MECP/3/L01", None).await,
            Err(TransportError::NotConnected)
        );

        radio.connect("loop-0").await.unwrap();
        radio.send_text("MECP/3/L01", Some(1)).await.unwrap();
        assert_eq!(
            radio.sent(),
            vec![SentFrame {
                text: "MECP/3/L01".into(),
                channel: Some(1)
            }]
        );
        assert_eq!(radio.device_id().as_deref(), Some("loop-0"));
    }

    #[tokio::test]
    async fn test_scripted_failures_and_link_drop() {
        let radio = LoopbackTransport::new();
        radio.connect("loop-0").await.unwrap();
        radio.fail_next_sends(1);
        radio.disconnect_after_sends(1);

        assert!(matches!(
            radio.send_text("a", None).await,
            Err(TransportError::SendFailed(_))
        ));
        radio.send_text("b", None).await.unwrap();
        assert_eq!(radio.status(), TransportStatus::Disconnected);
        assert_eq!(radio.sent_texts(), vec!["b"]);
    }

    #[test]
    fn test_inject_records_node() {
        let radio = LoopbackTransport::new();
        let sender = SenderIdentity::new("!b0b", "Bob", MeshPlatform::MeshCore);
        radio.inject(IncomingMessage {
            text: "hello".into(),
            sender: sender.clone(),
            channel: None,
            timestamp: 10,
            signal: None,
        });
        assert_eq!(radio.nodes(), vec![sender]);
    }
}
