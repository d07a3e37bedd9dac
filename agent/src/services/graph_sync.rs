//! Distributed graph loading and saving
//!
//! Loading splits a description along its topography and materializes each
//! segment on its owning peer, deepest segments first so every foreign
//! dependency is already exposed when its consumer loads. Saving is the
//! inverse merge: this peer's serialized graphs joined with every other
//! registered peer's, one hop each, no recursive fan-out.

use super::io::NodeIoService;
use crate::coordination::Coordination;
use crate::errors::{MeshError, Result};
use crate::graph::partition::Topography;
use crate::graph::segment::{split_topography, TopographicSegment};
use crate::graph::{serial, GraphDescription};
use crate::network::ClientPool;
use crate::reference::reachable_refs;
use crate::tensor::Tensor;
use crate::wire::NodeMeta;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct GraphSyncService {
    io: Arc<NodeIoService>,
    pool: Arc<ClientPool>,
    coordination: Arc<dyn Coordination>,
    service: String,
}

impl GraphSyncService {
    pub fn new(
        io: Arc<NodeIoService>,
        pool: Arc<ClientPool>,
        coordination: Arc<dyn Coordination>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            io,
            pool,
            coordination,
            service: service.into(),
        }
    }

    /// Materialize a description on this peer.
    ///
    /// Outputs are exposed under their declared ids and registered as
    /// roots; `resolved` carries handles for ids owned elsewhere.
    pub async fn local_load_graph(
        &self,
        desc: &GraphDescription,
        resolved: &HashMap<String, Tensor>,
    ) -> Result<Vec<Tensor>> {
        let (_, outputs) = serial::materialize(desc, resolved)?;
        for (id, t) in desc.outputs.iter().zip(&outputs) {
            self.io.expose_node(t, Some(id.clone())).await?;
            self.io.register_root(t);
        }
        tracing::info!(
            outputs = outputs.len(),
            nodes = desc.len(),
            "loaded graph fragment"
        );
        Ok(outputs)
    }

    /// Server side of a remote load request.
    pub async fn handle_load_graph(
        &self,
        graph: GraphDescription,
        refs: Vec<NodeMeta>,
    ) -> Result<Vec<NodeMeta>> {
        let mut resolved = HashMap::with_capacity(refs.len());
        for meta in &refs {
            resolved.insert(meta.id.clone(), self.io.lookup_or_expose_ref(meta)?);
        }
        let outputs = self.local_load_graph(&graph, &resolved).await?;
        Ok(graph
            .outputs
            .iter()
            .zip(&outputs)
            .map(|(id, t)| self.io.node_meta(id, t))
            .collect())
    }

    /// Load a description across the cluster along `topography`.
    ///
    /// Outputs with no assigned peer default to this peer. Returns handles
    /// for the description's outputs; foreign outputs come back as cached
    /// references.
    pub async fn load_graph(
        &self,
        desc: &GraphDescription,
        topography: &Topography,
    ) -> Result<Vec<Tensor>> {
        let mut topography = topography.clone();
        for output in &desc.outputs {
            topography
                .entry(output.clone())
                .or_insert_with(|| self.io.peer_id().to_string());
        }

        let segments = split_topography(desc, &topography)?;
        let mut ordered: Vec<&TopographicSegment> = Vec::new();
        for seg in &segments {
            deepest_first(seg, &mut ordered);
        }

        // output id -> handle, across every processed segment
        let mut resolved: HashMap<String, Tensor> = HashMap::new();
        for seg in ordered {
            self.load_segment(seg, &mut resolved).await?;
        }

        desc.outputs
            .iter()
            .map(|id| {
                resolved.get(id).cloned().ok_or_else(|| {
                    MeshError::InternalInconsistency(format!(
                        "output {} was not produced by any segment",
                        id
                    ))
                })
            })
            .collect()
    }

    async fn load_segment(
        &self,
        seg: &TopographicSegment,
        resolved: &mut HashMap<String, Tensor>,
    ) -> Result<()> {
        if seg.color == self.io.peer_id() {
            let outputs = self.local_load_graph(&seg.graph, resolved).await?;
            for (id, t) in seg.graph.outputs.iter().zip(outputs) {
                resolved.insert(id.clone(), t);
            }
            return Ok(());
        }

        // hand the foreign dependencies over as metadata; the remote peer
        // rebuilds them as its own cached references
        let mut refs = Vec::new();
        for sub in seg.subgraphs.values() {
            for id in &sub.graph.outputs {
                let t = resolved.get(id).ok_or_else(|| {
                    MeshError::InternalInconsistency(format!(
                        "segment for {} ordered before its dependency {}",
                        seg.color, id
                    ))
                })?;
                refs.push(self.io.node_meta(id, t));
            }
        }

        let client = self.pool.for_peer(&seg.color).await?;
        let metas = client.load_graph(seg.graph.clone(), refs).await?;
        if metas.len() != seg.graph.outputs.len() {
            return Err(MeshError::InternalInconsistency(format!(
                "peer {} loaded {} outputs, expected {}",
                seg.color,
                metas.len(),
                seg.graph.outputs.len()
            )));
        }
        for meta in metas {
            let t = self.io.lookup_or_expose_ref(&meta)?;
            resolved.insert(meta.id, t);
        }
        Ok(())
    }

    /// Serialize this peer's exposed graphs, stopping at references.
    ///
    /// The returned topography names this peer for every serialized output
    /// and the owning peer for every reference boundary.
    pub fn handle_save_graph(&self) -> Result<(GraphDescription, Topography)> {
        let roots = self.io.roots();
        let mut identified = self.io.identified();

        let mut desc = GraphDescription::default();
        let output_ids = serial::save_graph(&mut desc, &roots, &mut identified, &HashSet::new())?;

        let mut topography = Topography::new();
        for id in output_ids {
            topography.insert(id, self.io.peer_id().to_string());
        }
        for t in reachable_refs(&roots) {
            if let Some(r) = t.as_remote() {
                topography.insert(r.node_id().to_string(), r.cluster_id().to_string());
            }
        }
        Ok((desc, topography))
    }

    /// Merge the whole cluster's graphs into one description.
    pub async fn save_graph(&self) -> Result<(GraphDescription, Topography)> {
        let (mut desc, mut topography) = self.handle_save_graph()?;

        let peers = self.coordination.list_peers(&self.service).await?;
        for peer in peers {
            if peer.peer_id == self.io.peer_id() {
                continue;
            }
            let client = self.pool.for_addr(&peer.address).await;
            let (remote_desc, remote_topo) = client.save_graph().await?;
            crate::graph::merge_graph(&mut desc, &remote_desc);
            topography.extend(remote_topo);
        }
        Ok((desc, topography))
    }
}

/// Post-order flattening: nested segments before their consumers.
fn deepest_first<'a>(seg: &'a TopographicSegment, out: &mut Vec<&'a TopographicSegment>) {
    for sub in seg.subgraphs.values() {
        deepest_first(sub, out);
    }
    out.push(seg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::coordination::MemoryCoordination;
    use crate::graph::{OperationDef, ValueInput};
    use crate::tensor::Dtype;
    use std::time::Duration;

    fn setup(peer: &str) -> GraphSyncService {
        let coord = Arc::new(MemoryCoordination::new());
        let pool = Arc::new(ClientPool::new(
            coord.clone(),
            "graphmesh",
            AgentConfig::default().rpc,
        ));
        let io = Arc::new(NodeIoService::new(
            peer,
            "127.0.0.1:7400",
            "graphmesh",
            coord.clone(),
            pool.clone(),
            1,
            Duration::from_millis(1),
        ));
        GraphSyncService::new(io, pool, coord, "graphmesh")
    }

    fn small_desc() -> GraphDescription {
        GraphDescription {
            inputs: vec![ValueInput {
                id: "x".into(),
                dtype: Dtype::F64,
                shape: vec![2],
            }],
            initializers: vec![],
            nodes: vec![OperationDef {
                id: "r".into(),
                op: "NEG".into(),
                inputs: vec!["x".into()],
            }],
            outputs: vec!["r".into()],
        }
    }

    #[tokio::test]
    async fn test_local_load_exposes_outputs() {
        let sync = setup("mgr");
        let outputs = sync
            .local_load_graph(&small_desc(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(std::sync::Arc::ptr_eq(
            &sync.io.local_node("r").unwrap(),
            &outputs[0]
        ));
        assert_eq!(sync.io.roots().len(), 1);
    }

    #[tokio::test]
    async fn test_load_defaults_uncolored_outputs_to_self() {
        let sync = setup("mgr");
        // empty topography: everything lands on this peer
        let outputs = sync
            .load_graph(&small_desc(), &Topography::new())
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(!outputs[0].is_remote());
    }

    #[tokio::test]
    async fn test_save_round_trips_local_graph() {
        let sync = setup("mgr");
        sync.local_load_graph(&small_desc(), &HashMap::new())
            .await
            .unwrap();

        let (desc, topography) = sync.handle_save_graph().unwrap();
        assert!(desc.contains("r"));
        assert!(desc.contains("x"));
        assert_eq!(desc.outputs, vec!["r".to_string()]);
        assert_eq!(topography["r"], "mgr");
    }

    #[tokio::test]
    async fn test_saved_topography_names_reference_owners() {
        let sync = setup("mgr");
        let meta = NodeMeta {
            id: "far".into(),
            dtype: Dtype::F64,
            shape: vec![2],
            instance: "mgr2".into(),
        };
        let far = sync.io.lookup_or_expose_ref(&meta).unwrap();
        let root = crate::tensor::TensorNode::operation("SIN", vec![far]);
        sync.io.expose_node(&root, Some("root".into())).await.unwrap();
        sync.io.register_root(&root);

        let (desc, topography) = sync.handle_save_graph().unwrap();
        assert!(desc.contains("root"));
        assert!(!desc.contains("far"));
        assert_eq!(topography["root"], "mgr");
        assert_eq!(topography["far"], "mgr2");
    }
}
