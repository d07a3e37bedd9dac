//! Remote reference placeholders
//!
//! A `RemoteReference` stands in for a tensor owned by another peer. It
//! carries enough metadata to participate in the local graph (shape,
//! element type) plus a version-stamped byte cache of the last data seen
//! from the owner. The cache accepts only strictly newer versions, so
//! out-of-order delivery of stale data is ignored.

use crate::tensor::{n_elems, ptr_key, Dtype, Tensor, TensorKind};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::RwLock;

#[derive(Debug)]
struct DataCache {
    version: u64,
    bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct RemoteReference {
    cluster_id: String,
    node_id: String,
    dtype: Dtype,
    shape: Vec<usize>,
    cache: RwLock<DataCache>,
}

impl RemoteReference {
    pub fn new(
        cluster_id: impl Into<String>,
        node_id: impl Into<String>,
        dtype: Dtype,
        shape: Vec<usize>,
    ) -> Self {
        let nbytes = n_elems(&shape) * dtype.size();
        Self {
            cluster_id: cluster_id.into(),
            node_id: node_id.into(),
            dtype,
            shape,
            cache: RwLock::new(DataCache {
                version: 0,
                bytes: vec![0; nbytes],
            }),
        }
    }

    /// Id of the owning peer
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Global id of the node this reference stands in for
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn remote_string(&self) -> String {
        format!("{}/{}", self.cluster_id, self.node_id)
    }

    pub fn version(&self) -> u64 {
        self.cache.read().expect("reference cache poisoned").version
    }

    pub fn data(&self) -> Vec<u8> {
        self.cache
            .read()
            .expect("reference cache poisoned")
            .bytes
            .clone()
    }

    /// Install newer data; returns whether the update was applied.
    ///
    /// Versions never decrease: anything not strictly newer is dropped.
    pub fn update_data(&self, bytes: &[u8], version: u64) -> bool {
        let mut cache = self.cache.write().expect("reference cache poisoned");
        if version <= cache.version {
            tracing::debug!(
                node_id = %self.node_id,
                incoming = version,
                current = cache.version,
                "ignoring stale data update"
            );
            return false;
        }
        cache.bytes.clear();
        cache.bytes.extend_from_slice(bytes);
        cache.version = version;
        true
    }
}

/// Collect every remote reference reachable from `roots`.
///
/// Traversal never descends through a reference: the fragment behind it
/// belongs to another peer.
pub fn reachable_refs(roots: &[Tensor]) -> Vec<Tensor> {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut refs = Vec::new();
    let mut stack: Vec<Tensor> = roots.to_vec();
    while let Some(t) = stack.pop() {
        if !seen.insert(ptr_key(&t)) {
            continue;
        }
        match &t.kind {
            TensorKind::Remote(_) => refs.push(t.clone()),
            TensorKind::Operation { args, .. } => {
                for arg in args {
                    stack.push(arg.clone());
                }
            }
            _ => {}
        }
    }
    refs
}

/// Group reference node ids by owning peer, both levels ordered for
/// predictable fan-out.
pub fn separate_by_owner(refs: &[Tensor]) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for t in refs {
        if let Some(r) = t.as_remote() {
            out.entry(r.cluster_id().to_string())
                .or_default()
                .insert(r.node_id().to_string());
        }
    }
    out
}
