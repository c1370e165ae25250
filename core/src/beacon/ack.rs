// ACK wait loop
//
// After a MAYDAY goes out, wait for a B02 reply. One single-shot timer at a
// time; starting again aborts the previous one, and a generation counter
// makes a late-firing timer a no-op.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckState {
    Idle,
    Waiting,
    Acknowledged,
    Expired,
}

/// Node that answered our distress call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckSender {
    pub node_id: String,
    pub display_name: Option<String>,
}

#[derive(Debug)]
struct AckInner {
    state: AckState,
    generation: u64,
    sent_at: Option<u64>,
    acked_by: Option<AckSender>,
    timer: Option<JoinHandle<()>>,
}

impl AckInner {
    /// Abort any live timer and invalidate one that already fired
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }
}

#[derive(Debug, Clone)]
pub struct AckLoop {
    inner: Arc<Mutex<AckInner>>,
    timeout: Duration,
}

impl Default for AckLoop {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_TIMEOUT)
    }
}

impl AckLoop {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AckInner {
                state: AckState::Idle,
                generation: 0,
                sent_at: None,
                acked_by: None,
                timer: None,
            })),
            timeout,
        }
    }

    /// Begin waiting for an acknowledgement of a message sent at `sent_at`.
    ///
    /// Spawns the expiry timer, so this must run inside a Tokio runtime.
    pub fn start(&self, sent_at: u64) {
        let mut inner = self.inner.lock();
        inner.stop_timer();
        inner.state = AckState::Waiting;
        inner.sent_at = Some(sent_at);
        inner.acked_by = None;

        let generation = inner.generation;
        let weak: Weak<Mutex<AckInner>> = Arc::downgrade(&self.inner);
        let timeout = self.timeout;
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                let mut inner = shared.lock();
                if inner.generation == generation && inner.state == AckState::Waiting {
                    inner.state = AckState::Expired;
                    inner.timer = None;
                    info!("No acknowledgement within {:?}", timeout);
                }
            }
        }));
        debug!("ACK loop waiting (sent at {})", sent_at);
    }

    /// Resolve the wait. Applies whatever the current state is.
    pub fn acknowledge(&self, node_id: &str, display_name: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.stop_timer();
        inner.state = AckState::Acknowledged;
        inner.acked_by = Some(AckSender {
            node_id: node_id.to_string(),
            display_name: display_name.map(str::to_string),
        });
        info!("Acknowledged by {}", node_id);
    }

    /// Cancel the timer and return to idle
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.stop_timer();
        inner.state = AckState::Idle;
        inner.sent_at = None;
        inner.acked_by = None;
    }

    pub fn state(&self) -> AckState {
        self.inner.lock().state
    }

    pub fn sent_at(&self) -> Option<u64> {
        self.inner.lock().sent_at
    }

    pub fn acknowledged_by(&self) -> Option<AckSender> {
        self.inner.lock().acked_by.clone()
    }

    pub fn has_live_timer(&self) -> bool {
        self.inner
            .lock()
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_timeout() {
        let ack = AckLoop::default();
        ack.start(1_000);
        assert_eq!(ack.state(), AckState::Waiting);

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        assert_eq!(ack.state(), AckState::Waiting);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ack.state(), AckState::Expired);
        assert!(!ack.has_live_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_before_timeout() {
        let ack = AckLoop::default();
        ack.start(1_000);
        ack.acknowledge("!rescue", Some("Mountain Rescue"));

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(ack.state(), AckState::Acknowledged);
        assert_eq!(
            ack.acknowledged_by().map(|a| a.node_id),
            Some("!rescue".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_timer() {
        let ack = AckLoop::new(Duration::from_secs(60));
        ack.start(1);
        tokio::time::sleep(Duration::from_secs(50)).await;
        ack.start(2);

        // First timer would have fired here
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ack.state(), AckState::Waiting);
        assert_eq!(ack.sent_at(), Some(2));

        tokio::time::sleep(Duration::from_secs(41)).await;
        assert_eq!(ack.state(), AckState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets() {
        let ack = AckLoop::default();
        ack.start(1);
        ack.clear();
        assert_eq!(ack.state(), AckState::Idle);
        assert!(!ack.has_live_timer());

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(ack.state(), AckState::Idle);
    }
}
