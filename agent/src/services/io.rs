//! Node identity and cross-peer reference resolution
//!
//! Owned nodes are exposed under published ids: the id-to-address mapping
//! goes to the coordination service so any peer can find the owner. Nodes
//! owned elsewhere are cached locally as remote references, one handle per
//! id, so repeated lookups and shared consumers all see the same cache.
//!
//! The node table uses a std `RwLock`; it is never held across an await.
//! Coordination writes happen after the lock is released.

use crate::coordination::Coordination;
use crate::errors::{MeshError, Result};
use crate::network::ClientPool;
use crate::reference::RemoteReference;
use crate::tensor::{ptr_key, Tensor, TensorKind, TensorNode};
use crate::wire::NodeMeta;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct IoData {
    /// Published id -> tensor (owned nodes and cached references)
    by_id: HashMap<String, Tensor>,
    /// Tensor pointer -> published id
    ids: HashMap<usize, String>,
    /// Exposed graph roots, in registration order
    roots: Vec<Tensor>,
}

pub struct NodeIoService {
    peer_id: String,
    advertise_addr: String,
    namespace: String,
    coordination: Arc<dyn Coordination>,
    pool: Arc<ClientPool>,
    lookup_attempts: u32,
    lookup_backoff: Duration,
    data: RwLock<IoData>,
}

impl NodeIoService {
    pub fn new(
        peer_id: impl Into<String>,
        advertise_addr: impl Into<String>,
        namespace: impl Into<String>,
        coordination: Arc<dyn Coordination>,
        pool: Arc<ClientPool>,
        lookup_attempts: u32,
        lookup_backoff: Duration,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            advertise_addr: advertise_addr.into(),
            namespace: namespace.into(),
            coordination,
            pool,
            lookup_attempts: lookup_attempts.max(1),
            lookup_backoff,
            data: RwLock::new(IoData::default()),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn node_key(&self, id: &str) -> String {
        crate::config::node_key(&self.namespace, id)
    }

    /// Published id of an already-exposed tensor.
    pub fn lookup_id(&self, t: &Tensor) -> Option<String> {
        self.data
            .read()
            .expect("node table poisoned")
            .ids
            .get(&ptr_key(t))
            .cloned()
    }

    /// Locally known tensor for an id, owned or cached.
    pub fn local_node(&self, id: &str) -> Option<Tensor> {
        self.data
            .read()
            .expect("node table poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    /// Expose a tensor under a published id.
    ///
    /// A suggested id is claimed only if the coordination service does not
    /// already map it to a different peer; a collision is a `Conflict`.
    /// Re-exposing an already-exposed tensor returns its existing id.
    pub async fn expose_node(&self, t: &Tensor, suggest: Option<String>) -> Result<String> {
        // references keep the owner's id and are only cached
        if let TensorKind::Remote(r) = &t.kind {
            let id = r.node_id().to_string();
            let mut data = self.data.write().expect("node table poisoned");
            data.ids.insert(ptr_key(t), id.clone());
            data.by_id.entry(id.clone()).or_insert_with(|| t.clone());
            return Ok(id);
        }

        if let Some(id) = self.lookup_id(t) {
            return Ok(id);
        }

        let id = match suggest {
            Some(id) => {
                match self.coordination.get(&self.node_key(&id)).await? {
                    Some(owner) if owner != self.advertise_addr => {
                        return Err(MeshError::Conflict(format!(
                            "id {} is already owned by {}",
                            id, owner
                        )));
                    }
                    _ => id,
                }
            }
            None => Uuid::new_v4().to_string(),
        };

        {
            let mut data = self.data.write().expect("node table poisoned");
            // a concurrent expose may have won the race
            if let Some(existing) = data.ids.get(&ptr_key(t)) {
                return Ok(existing.clone());
            }
            data.ids.insert(ptr_key(t), id.clone());
            data.by_id.insert(id.clone(), t.clone());
        }

        self.coordination
            .put(&self.node_key(&id), &self.advertise_addr)
            .await?;
        tracing::debug!(id = %id, "exposed node");
        Ok(id)
    }

    /// Resolve an id to a tensor.
    ///
    /// Local table first; with `recursive`, one remote hop: find the owner
    /// through coordination, describe the node there and cache a reference.
    pub async fn lookup_node(&self, id: &str, recursive: bool) -> Result<Tensor> {
        if let Some(t) = self.local_node(id) {
            return Ok(t);
        }
        if !recursive {
            return Err(MeshError::NotFound(format!("node {} is not local", id)));
        }

        // publication may lag exposure on the owning peer
        let key = self.node_key(id);
        let mut addr = None;
        for attempt in 1..=self.lookup_attempts {
            addr = self.coordination.get(&key).await?;
            if addr.is_some() {
                break;
            }
            if attempt < self.lookup_attempts {
                tokio::time::sleep(self.lookup_backoff * attempt).await;
            }
        }
        let addr = addr
            .ok_or_else(|| MeshError::NotFound(format!("no owner published for node {}", id)))?;
        if addr == self.advertise_addr {
            return Err(MeshError::InternalInconsistency(format!(
                "node {} is published to this peer but missing from its table",
                id
            )));
        }

        let client = self.pool.for_addr(&addr).await;
        let metas = client.describe_nodes(vec![id.to_string()]).await?;
        let meta = metas
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| MeshError::NotFound(format!("owner at {} does not know {}", addr, id)))?;
        self.lookup_or_expose_ref(&meta)
    }

    /// Turn a described node into a local handle.
    ///
    /// Metadata claiming this peer as owner must resolve in the local
    /// table; anything else gets a cached reference, created on first use.
    pub fn lookup_or_expose_ref(&self, meta: &NodeMeta) -> Result<Tensor> {
        if meta.instance == self.peer_id {
            return self.local_node(&meta.id).ok_or_else(|| {
                MeshError::InternalInconsistency(format!(
                    "peer {} described {} as ours but it is not in the table",
                    meta.instance, meta.id
                ))
            });
        }

        let mut data = self.data.write().expect("node table poisoned");
        if let Some(existing) = data.by_id.get(&meta.id) {
            return Ok(existing.clone());
        }
        let t = TensorNode::remote(RemoteReference::new(
            meta.instance.clone(),
            meta.id.clone(),
            meta.dtype,
            meta.shape.clone(),
        ));
        data.ids.insert(ptr_key(&t), meta.id.clone());
        data.by_id.insert(meta.id.clone(), t.clone());
        Ok(t)
    }

    /// Serialized view of one known node.
    pub fn node_meta(&self, id: &str, t: &Tensor) -> NodeMeta {
        let instance = match t.as_remote() {
            Some(r) => r.cluster_id().to_string(),
            None => self.peer_id.clone(),
        };
        NodeMeta {
            id: id.to_string(),
            dtype: t.dtype,
            shape: t.shape.clone(),
            instance,
        }
    }

    /// Describe ids for a remote caller; unknown ids are omitted, the
    /// caller decides whether absence is an error.
    pub fn describe(&self, ids: &[String]) -> Vec<NodeMeta> {
        let data = self.data.read().expect("node table poisoned");
        ids.iter()
            .filter_map(|id| data.by_id.get(id).map(|t| (id, t.clone())))
            .map(|(id, t)| self.node_meta(id, &t))
            .collect()
    }

    /// Record an exposed graph root.
    pub fn register_root(&self, t: &Tensor) {
        let mut data = self.data.write().expect("node table poisoned");
        if !data.roots.iter().any(|r| Arc::ptr_eq(r, t)) {
            data.roots.push(t.clone());
        }
    }

    pub fn roots(&self) -> Vec<Tensor> {
        self.data.read().expect("node table poisoned").roots.clone()
    }

    /// Snapshot of the pointer-to-id table, for graph serialization.
    pub fn identified(&self) -> HashMap<usize, String> {
        self.data.read().expect("node table poisoned").ids.clone()
    }

    /// Apply a pushed data version to the cached reference for `id`.
    pub fn apply_data_update(&self, id: &str, bytes: &[u8], version: u64) -> bool {
        match self.local_node(id).as_deref().and_then(TensorNode::as_remote) {
            Some(r) => r.update_data(bytes, version),
            None => {
                tracing::debug!(id, "data update for an id with no cached reference");
                false
            }
        }
    }
}
