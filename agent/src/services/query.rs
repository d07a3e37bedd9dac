//! Distributed pattern queries
//!
//! A query runs locally over the given roots, then fans out one RPC per
//! peer that owns a reference reachable from those roots, carrying only
//! that owner's reference ids as remote query roots. Any failed leg fails
//! the whole query: a partial result set would silently hide matches.
//! Remote matches come back as node metadata and are merged in as cached
//! references.

use super::io::NodeIoService;
use crate::errors::{MeshError, Result};
use crate::network::ClientPool;
use crate::query::{PatternNode, QueryIndex, QueryMatch};
use crate::reference::{reachable_refs, separate_by_owner};
use crate::tensor::Tensor;
use crate::wire::MatchedResult;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct DistrQueryService {
    io: Arc<NodeIoService>,
    pool: Arc<ClientPool>,
}

impl DistrQueryService {
    pub fn new(io: Arc<NodeIoService>, pool: Arc<ClientPool>) -> Self {
        Self { io, pool }
    }

    /// Server side: resolve the requested roots locally and match, with
    /// every matched node exposed so the caller can reference it.
    pub async fn handle_pattern_query(
        &self,
        pattern: &PatternNode,
        root_ids: &[String],
    ) -> Result<Vec<MatchedResult>> {
        let mut roots = Vec::with_capacity(root_ids.len());
        for id in root_ids {
            roots.push(self.io.lookup_node(id, false).await?);
        }
        let matches = QueryIndex::new(&roots).match_pattern(pattern);
        tracing::debug!(count = matches.len(), "local pattern matches");

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            let root_id = self.io.expose_node(&m.root, None).await?;
            let mut symbols = BTreeMap::new();
            for (name, t) in &m.symbols {
                let id = self.io.expose_node(t, None).await?;
                symbols.insert(name.clone(), self.io.node_meta(&id, t));
            }
            results.push(MatchedResult {
                root: self.io.node_meta(&root_id, &m.root),
                symbols,
            });
        }
        Ok(results)
    }

    /// Distributed query over the graphs under `roots`.
    ///
    /// Fans out one call per owner of a reachable reference, scoped to
    /// that owner's reference ids. One remote hop; fails on the first
    /// failed leg.
    pub async fn query(&self, roots: &[Tensor], pattern: &PatternNode) -> Result<Vec<QueryMatch>> {
        let mut matches = QueryIndex::new(roots).match_pattern(pattern);

        let owners = separate_by_owner(&reachable_refs(roots));
        let legs = owners.into_iter().map(|(owner, ids)| {
            let pattern = pattern.clone();
            async move {
                let client = self.pool.for_peer(&owner).await?;
                let remote = client
                    .pattern_query(pattern, ids.into_iter().collect())
                    .await?;
                Ok::<_, MeshError>((owner, remote))
            }
        });

        for (owner, remote) in try_join_all(legs).await? {
            tracing::debug!(peer = %owner, count = remote.len(), "remote pattern matches");
            for m in remote {
                matches.push(self.merge_remote(&m)?);
            }
        }
        Ok(matches)
    }

    fn merge_remote(&self, m: &MatchedResult) -> Result<QueryMatch> {
        let root = self.io.lookup_or_expose_ref(&m.root)?;
        let mut symbols = BTreeMap::new();
        for (name, meta) in &m.symbols {
            symbols.insert(name.clone(), self.io.lookup_or_expose_ref(meta)?);
        }
        Ok(QueryMatch { root, symbols })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::coordination::MemoryCoordination;
    use crate::reference::RemoteReference;
    use crate::tensor::{Dtype, TensorNode};
    use std::time::Duration;

    fn setup() -> (Arc<NodeIoService>, DistrQueryService) {
        let coord = Arc::new(MemoryCoordination::new());
        let pool = Arc::new(ClientPool::new(
            coord.clone(),
            "graphmesh",
            AgentConfig::default().rpc,
        ));
        let io = Arc::new(NodeIoService::new(
            "mgr",
            "127.0.0.1:7400",
            "graphmesh",
            coord,
            pool.clone(),
            1,
            Duration::from_millis(1),
        ));
        let query = DistrQueryService::new(io.clone(), pool);
        (io, query)
    }

    #[tokio::test]
    async fn test_handled_matches_are_exposed() {
        let (io, query) = setup();
        let x = TensorNode::variable("x", Dtype::F64, vec![2]);
        let root = TensorNode::operation("ADD", vec![x.clone(), x.clone()]);
        let id = io.expose_node(&root, Some("sym".into())).await.unwrap();

        let pattern = PatternNode::operator(
            "ADD",
            vec![PatternNode::symbol("A"), PatternNode::symbol("A")],
        );
        let results = query
            .handle_pattern_query(&pattern, &[id])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].root.id, "sym");
        assert_eq!(results[0].root.instance, "mgr");
        // matched nodes are now resolvable by id
        let meta = &results[0].symbols["A"];
        assert!(io.local_node(&meta.id).is_some());
    }

    #[tokio::test]
    async fn test_handled_query_rejects_unknown_roots() {
        let (_io, query) = setup();
        let pattern = PatternNode::any_leaf();
        let err = query
            .handle_pattern_query(&pattern, &["nowhere".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_without_references_stays_local() {
        let (_io, query) = setup();
        let root = TensorNode::operation(
            "SIN",
            vec![TensorNode::variable("x", Dtype::F64, vec![2])],
        );

        let pattern = PatternNode::operator("SIN", vec![PatternNode::any_leaf()]);
        let matches = query.query(&[root.clone()], &pattern).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!(Arc::ptr_eq(&matches[0].root, &root));
    }

    #[tokio::test]
    async fn test_query_fails_when_an_owner_is_unreachable() {
        let (_io, query) = setup();
        let far = TensorNode::remote(RemoteReference::new("ghost", "x", Dtype::F64, vec![2]));
        let root = TensorNode::operation("NEG", vec![far]);

        // the owner is not registered anywhere: the whole query fails
        // rather than returning a silently partial result
        let err = query
            .query(&[root], &PatternNode::any_leaf())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Unavailable(_)));
    }
}
