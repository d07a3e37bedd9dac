//! Outbound RPC clients
//!
//! A `PeerClient` opens one TCP connection per call; calls are cheap and
//! infrequent enough that connection reuse is not worth the bookkeeping.
//! Idempotent calls retry with bounded linear backoff; anything that
//! registers state on the remote side gets exactly one attempt.

use crate::config::RpcConfig;
use crate::coordination::Coordination;
use crate::errors::{MeshError, Result};
use crate::graph::partition::Topography;
use crate::graph::GraphDescription;
use crate::query::PatternNode;
use crate::wire::{
    read_frame, write_frame, MatchedResult, NodeMeta, Request, Response, StreamItem,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct PeerClient {
    addr: String,
    request_timeout: Duration,
    stream_timeout: Duration,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl PeerClient {
    pub fn new(addr: impl Into<String>, rpc: &RpcConfig) -> Self {
        Self {
            addr: addr.into(),
            request_timeout: Duration::from_millis(rpc.request_timeout_ms),
            stream_timeout: Duration::from_millis(rpc.stream_timeout_ms),
            retry_attempts: rpc.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(rpc.retry_backoff_ms),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call_once(&self, request: &Request) -> Result<Response> {
        let fut = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            write_frame(&mut stream, request).await?;
            read_frame::<Response, _>(&mut stream).await
        };
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(MeshError::Timeout(format!(
                "request to {} exceeded {:?}",
                self.addr, self.request_timeout
            ))),
        }
    }

    /// One call, bounded retries on retryable failures.
    async fn call_with_retry(&self, request: &Request) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.call_once(request).await {
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let backoff = self.retry_backoff * attempt;
                    tracing::debug!(
                        addr = %self.addr,
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying idempotent call"
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }

    pub async fn describe_nodes(&self, ids: Vec<String>) -> Result<Vec<NodeMeta>> {
        match self
            .call_with_retry(&Request::DescribeNodes { ids })
            .await?
        {
            Response::Nodes(nodes) => Ok(nodes),
            other => unexpected(other),
        }
    }

    /// Single attempt: failed fan-out legs surface to the caller unretried.
    pub async fn pattern_query(
        &self,
        pattern: PatternNode,
        roots: Vec<String>,
    ) -> Result<Vec<MatchedResult>> {
        match self
            .call_once(&Request::PatternQuery { pattern, roots })
            .await?
        {
            Response::Matches(matches) => Ok(matches),
            other => unexpected(other),
        }
    }

    /// Single attempt: loading registers ids on the remote peer.
    pub async fn load_graph(
        &self,
        graph: GraphDescription,
        refs: Vec<NodeMeta>,
    ) -> Result<Vec<NodeMeta>> {
        match self.call_once(&Request::LoadGraph { graph, refs }).await? {
            Response::Loaded(nodes) => Ok(nodes),
            other => unexpected(other),
        }
    }

    pub async fn save_graph(&self) -> Result<(GraphDescription, Topography)> {
        match self.call_with_retry(&Request::SaveGraph).await? {
            Response::Saved { graph, topography } => Ok((graph, topography)),
            other => unexpected(other),
        }
    }

    /// Version-gated on the receiver, so safe to retry.
    pub async fn update_data(&self, id: String, version: u64, bytes: Vec<u8>) -> Result<bool> {
        match self
            .call_with_retry(&Request::UpdateData { id, version, bytes })
            .await?
        {
            Response::Updated { applied } => Ok(applied),
            other => unexpected(other),
        }
    }

    /// Collect a streamed rendering, id and text per fragment.
    ///
    /// Rendering is a read, so interrupted streams are retried whole.
    pub async fn stream_ascii(&self, id: String) -> Result<Vec<(String, String)>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.stream_once(id.clone()).await {
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    async fn stream_once(&self, id: String) -> Result<Vec<(String, String)>> {
        let fut = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            write_frame(&mut stream, &Request::StreamAscii { id }).await?;
            let mut fragments = Vec::new();
            loop {
                match read_frame::<StreamItem, _>(&mut stream).await? {
                    StreamItem::Fragment { id, text } => fragments.push((id, text)),
                    StreamItem::Done => return Ok(fragments),
                }
            }
        };
        match timeout(self.stream_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(MeshError::Timeout(format!(
                "stream from {} exceeded {:?}",
                self.addr, self.stream_timeout
            ))),
        }
    }
}

fn unexpected<T>(response: Response) -> Result<T> {
    match response {
        Response::Error { kind, message } => Err(kind.into_error(message)),
        other => Err(MeshError::InternalInconsistency(format!(
            "unexpected response variant: {:?}",
            other
        ))),
    }
}

/// Clients keyed by address and by resolved peer id.
///
/// Addresses come either straight from published node keys or from the
/// peer directory; both routes share the per-address client.
pub struct ClientPool {
    coordination: Arc<dyn Coordination>,
    service: String,
    rpc: RpcConfig,
    by_addr: RwLock<HashMap<String, Arc<PeerClient>>>,
    by_peer: RwLock<HashMap<String, Arc<PeerClient>>>,
}

impl ClientPool {
    pub fn new(coordination: Arc<dyn Coordination>, service: impl Into<String>, rpc: RpcConfig) -> Self {
        Self {
            coordination,
            service: service.into(),
            rpc,
            by_addr: RwLock::new(HashMap::new()),
            by_peer: RwLock::new(HashMap::new()),
        }
    }

    pub async fn for_addr(&self, addr: &str) -> Arc<PeerClient> {
        if let Some(client) = self.by_addr.read().await.get(addr) {
            return client.clone();
        }
        let mut by_addr = self.by_addr.write().await;
        by_addr
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(PeerClient::new(addr, &self.rpc)))
            .clone()
    }

    /// Resolve a peer id through the directory.
    pub async fn for_peer(&self, peer_id: &str) -> Result<Arc<PeerClient>> {
        if let Some(client) = self.by_peer.read().await.get(peer_id) {
            return Ok(client.clone());
        }
        let peers = self.coordination.list_peers(&self.service).await?;
        let entry = peers
            .into_iter()
            .find(|p| p.peer_id == peer_id)
            .ok_or_else(|| {
                MeshError::Unavailable(format!("peer {} is not registered", peer_id))
            })?;
        let client = self.for_addr(&entry.address).await;
        self.by_peer
            .write()
            .await
            .insert(peer_id.to_string(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordination;

    #[tokio::test]
    async fn test_pool_shares_clients_across_keys() {
        let coord = Arc::new(MemoryCoordination::new());
        coord
            .register_peer("graphmesh", "mgr2", "127.0.0.1:7401")
            .await
            .unwrap();

        let pool = ClientPool::new(coord, "graphmesh", crate::config::AgentConfig::default().rpc);
        let by_addr = pool.for_addr("127.0.0.1:7401").await;
        let by_peer = pool.for_peer("mgr2").await.unwrap();
        assert!(Arc::ptr_eq(&by_addr, &by_peer));
    }

    #[tokio::test]
    async fn test_unknown_peer_is_unavailable() {
        let pool = ClientPool::new(
            Arc::new(MemoryCoordination::new()),
            "graphmesh",
            crate::config::AgentConfig::default().rpc,
        );
        let err = pool.for_peer("ghost").await.unwrap_err();
        assert!(matches!(err, MeshError::Unavailable(_)));
    }
}
