// Node directory: last-seen cache of mesh nodes heard over the radio

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::abstraction::SenderIdentity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownNode {
    pub identity: SenderIdentity,
    pub first_seen: u64,
    pub last_seen: u64,
}

#[derive(Debug, Default)]
pub struct NodeDirectory {
    nodes: HashMap<String, KnownNode>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a node. Later identities overwrite display names.
    pub fn upsert(&mut self, identity: &SenderIdentity, seen_at: u64) {
        self.nodes
            .entry(identity.node_id.clone())
            .and_modify(|node| {
                node.identity = identity.clone();
                node.last_seen = node.last_seen.max(seen_at);
            })
            .or_insert_with(|| KnownNode {
                identity: identity.clone(),
                first_seen: seen_at,
                last_seen: seen_at,
            });
    }

    pub fn get(&self, node_id: &str) -> Option<&KnownNode> {
        self.nodes.get(node_id)
    }

    /// Most recently heard first
    pub fn all(&self) -> Vec<KnownNode> {
        let mut nodes: Vec<KnownNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        nodes
    }

    /// Forget nodes not heard within `max_age`. Returns how many were dropped.
    pub fn prune(&mut self, max_age: Duration, now: u64) -> usize {
        let cutoff = now.saturating_sub(max_age.as_millis() as u64);
        let before = self.nodes.len();
        self.nodes.retain(|_, node| node.last_seen >= cutoff);
        before - self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MeshPlatform;

    fn node(id: &str, name: &str) -> SenderIdentity {
        SenderIdentity::new(id, name, MeshPlatform::Meshtastic)
    }

    #[test]
    fn test_upsert_refreshes() {
        let mut dir = NodeDirectory::new();
        dir.upsert(&node("!aa", "Alpha"), 100);
        dir.upsert(&node("!aa", "Alpha Base"), 250);

        let known = dir.get("!aa").unwrap();
        assert_eq!(known.first_seen, 100);
        assert_eq!(known.last_seen, 250);
        assert_eq!(known.identity.display_name, "Alpha Base");
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_prune_by_age() {
        let mut dir = NodeDirectory::new();
        dir.upsert(&node("!old", "Old"), 0);
        dir.upsert(&node("!new", "New"), 50_000);

        let dropped = dir.prune(Duration::from_secs(60), 90_000);
        assert_eq!(dropped, 1);
        assert!(dir.get("!old").is_none());
        assert_eq!(dir.all()[0].identity.node_id, "!new");
    }
}
