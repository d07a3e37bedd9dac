//! Coordination-service client
//!
//! Peers rendezvous through a small KV and peer-directory service. The
//! trait keeps the mesh logic independent of the transport: production
//! uses the HTTP coordinator, tests share one in-memory instance between
//! peers running in the same process.

use crate::errors::{MeshError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

/// One registered peer of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub peer_id: String,
    pub address: String,
}

/// Registration payload for the peer directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRegistration {
    pub service: String,
    pub peer_id: String,
    pub address: String,
}

#[async_trait]
pub trait Coordination: Send + Sync {
    /// Publish a key; last writer wins.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Read a key; absence is not an error.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Register (or refresh) this peer under a service name.
    async fn register_peer(&self, service: &str, peer_id: &str, address: &str) -> Result<()>;

    /// Every live peer of a service.
    async fn list_peers(&self, service: &str) -> Result<Vec<PeerEntry>>;
}

/// In-process coordination shared between test peers
#[derive(Default)]
pub struct MemoryCoordination {
    kv: RwLock<HashMap<String, String>>,
    peers: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Coordination for MemoryCoordination {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.kv
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.kv.read().await.get(key).cloned())
    }

    async fn register_peer(&self, service: &str, peer_id: &str, address: &str) -> Result<()> {
        self.peers
            .write()
            .await
            .entry(service.to_string())
            .or_default()
            .insert(peer_id.to_string(), address.to_string());
        Ok(())
    }

    async fn list_peers(&self, service: &str) -> Result<Vec<PeerEntry>> {
        Ok(self
            .peers
            .read()
            .await
            .get(service)
            .map(|m| {
                m.iter()
                    .map(|(peer_id, address)| PeerEntry {
                        peer_id: peer_id.clone(),
                        address: address.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Client for the HTTP coordinator
pub struct HttpCoordination {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCoordination {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Coordination for HttpCoordination {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/kv/{}", self.base_url, key))
            .body(value.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MeshError::Unavailable(format!(
                "coordinator rejected put of {}: {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}/kv/{}", self.base_url, key))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MeshError::Unavailable(format!(
                "coordinator rejected get of {}: {}",
                key,
                response.status()
            )));
        }
        Ok(Some(response.text().await?))
    }

    async fn register_peer(&self, service: &str, peer_id: &str, address: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/peers", self.base_url))
            .json(&PeerRegistration {
                service: service.to_string(),
                peer_id: peer_id.to_string(),
                address: address.to_string(),
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MeshError::Unavailable(format!(
                "coordinator rejected registration of {}: {}",
                peer_id,
                response.status()
            )));
        }
        Ok(())
    }

    async fn list_peers(&self, service: &str) -> Result<Vec<PeerEntry>> {
        let response = self
            .client
            .get(format!("{}/peers/{}", self.base_url, service))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MeshError::Unavailable(format!(
                "coordinator rejected peer listing: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}
