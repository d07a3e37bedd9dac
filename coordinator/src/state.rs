//! In-memory coordination state
//!
//! Two tables: a last-writer-wins KV (node id to owner address) and a
//! peer directory keyed by service name. Directory entries carry a
//! last-seen timestamp; listings filter out anything past the staleness
//! window, so a crashed peer disappears once its heartbeats stop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub peer_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerRegistration {
    pub service: String,
    pub peer_id: String,
    pub address: String,
}

#[derive(Debug, Clone)]
struct PeerRecord {
    address: String,
    last_seen: Instant,
}

pub struct AppState {
    stale_after: Duration,
    kv: RwLock<HashMap<String, String>>,
    /// service -> peer_id -> record
    peers: RwLock<HashMap<String, HashMap<String, PeerRecord>>>,
}

impl AppState {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            kv: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, key: String, value: String) {
        self.kv.write().expect("kv table poisoned").insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.kv.read().expect("kv table poisoned").get(key).cloned()
    }

    pub fn register(&self, registration: PeerRegistration) {
        let mut peers = self.peers.write().expect("peer table poisoned");
        peers.entry(registration.service).or_default().insert(
            registration.peer_id,
            PeerRecord {
                address: registration.address,
                last_seen: Instant::now(),
            },
        );
    }

    /// Live peers of a service, sorted by peer id.
    pub fn list(&self, service: &str) -> Vec<PeerEntry> {
        let now = Instant::now();
        let peers = self.peers.read().expect("peer table poisoned");
        let mut entries: Vec<PeerEntry> = peers
            .get(service)
            .map(|m| {
                m.iter()
                    .filter(|(_, record)| now.duration_since(record.last_seen) < self.stale_after)
                    .map(|(peer_id, record)| PeerEntry {
                        peer_id: peer_id.clone(),
                        address: record.address.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(service: &str, peer: &str, addr: &str) -> PeerRegistration {
        PeerRegistration {
            service: service.to_string(),
            peer_id: peer.to_string(),
            address: addr.to_string(),
        }
    }

    #[test]
    fn test_kv_last_writer_wins() {
        let state = AppState::new(Duration::from_secs(60));
        assert_eq!(state.get("graphmesh.node.a"), None);
        state.put("graphmesh.node.a".into(), "127.0.0.1:7400".into());
        state.put("graphmesh.node.a".into(), "127.0.0.1:7401".into());
        assert_eq!(state.get("graphmesh.node.a").as_deref(), Some("127.0.0.1:7401"));
    }

    #[test]
    fn test_listing_is_sorted_and_per_service() {
        let state = AppState::new(Duration::from_secs(60));
        state.register(registration("graphmesh", "mgr2", "127.0.0.1:7401"));
        state.register(registration("graphmesh", "mgr", "127.0.0.1:7400"));
        state.register(registration("other", "x", "127.0.0.1:9999"));

        let peers = state.list("graphmesh");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].peer_id, "mgr");
        assert_eq!(peers[1].peer_id, "mgr2");
        assert!(state.list("unknown").is_empty());
    }

    #[test]
    fn test_stale_peers_are_filtered() {
        let state = AppState::new(Duration::from_millis(0));
        state.register(registration("graphmesh", "mgr", "127.0.0.1:7400"));
        // zero staleness window: everything is already stale
        assert!(state.list("graphmesh").is_empty());
    }

    #[test]
    fn test_peer_entry_wire_shape() {
        // agents deserialize listings by these field names
        let entry = PeerEntry {
            peer_id: "mgr".into(),
            address: "127.0.0.1:7400".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"peer_id":"mgr","address":"127.0.0.1:7400"}"#);
    }

    #[test]
    fn test_reregistration_refreshes_address() {
        let state = AppState::new(Duration::from_secs(60));
        state.register(registration("graphmesh", "mgr", "127.0.0.1:7400"));
        state.register(registration("graphmesh", "mgr", "127.0.0.1:7402"));
        let peers = state.list("graphmesh");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "127.0.0.1:7402");
    }
}
