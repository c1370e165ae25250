// Deduplicator: suppress mesh rebroadcasts of the same frame
//
// Mesh flooding delivers one frame several times. Keys live for the window
// and are pruned lazily on each lookup. Process lifetime only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(10 * 60);

/// `sender:text`
pub fn make_key(sender_node_id: &str, text: &str) -> String {
    format!("{}:{}", sender_node_id, text)
}

pub struct Deduplicator {
    seen: HashMap<String, u64>,
    window_ms: u64,
    clock: Arc<dyn Clock>,
}

impl Deduplicator {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: HashMap::new(),
            window_ms: window.as_millis() as u64,
            clock,
        }
    }

    pub fn with_default_window(clock: Arc<dyn Clock>) -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW, clock)
    }

    /// True if `key` was seen within the window. Otherwise records it and returns false.
    pub fn is_duplicate(&mut self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.prune(now);

        if self.seen.contains_key(key) {
            debug!("Suppressed duplicate frame");
            return true;
        }
        self.seen.insert(key.to_string(), now);
        false
    }

    fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window_ms);
        self.seen.retain(|_, first_seen| *first_seen >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
