//! Peer lifecycle and the high-level mesh API
//!
//! A `PeerManager` owns the listener, the service hub and the background
//! tasks of one peer: the accept loop and the registration heartbeat.
//! Binding to port 0 is supported; the advertised address then follows the
//! actual bound port, which keeps multi-peer tests free of port clashes.

use crate::config::AgentConfig;
use crate::coordination::Coordination;
use crate::errors::Result;
use crate::graph::partition::{kmeans, random_selector, MeanSelector, Topography};
use crate::graph::topology::disjoint_graphs;
use crate::graph::{extract_nodes, GraphDescription};
use crate::network::{server, ClientPool};
use crate::query::{PatternNode, QueryMatch};
use crate::services::{
    DistrQueryService, GraphSyncService, NodeIoService, PeerServices, PrintService,
};
use crate::tensor::Tensor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct PeerManager {
    config: AgentConfig,
    coordination: Arc<dyn Coordination>,
    services: Arc<PeerServices>,
    advertise_addr: String,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<()>>,
    heartbeat_task: JoinHandle<()>,
}

impl PeerManager {
    /// Bind, register with the coordinator and start serving.
    pub async fn start(config: AgentConfig, coordination: Arc<dyn Coordination>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.peer.listen_addr).await?;
        let bound = listener.local_addr()?;
        let advertise_addr = if config.peer.advertise_addr.ends_with(":0") {
            bound.to_string()
        } else {
            config.peer.advertise_addr.clone()
        };
        tracing::info!(
            peer_id = %config.peer.peer_id,
            listen = %bound,
            advertise = %advertise_addr,
            "peer starting"
        );

        let pool = Arc::new(ClientPool::new(
            coordination.clone(),
            config.coordination.service.clone(),
            config.rpc.clone(),
        ));
        let io = Arc::new(NodeIoService::new(
            config.peer.peer_id.clone(),
            advertise_addr.clone(),
            config.coordination.namespace.clone(),
            coordination.clone(),
            pool.clone(),
            config.rpc.retry_attempts,
            config.retry_backoff(),
        ));
        let services = Arc::new(PeerServices {
            query: Arc::new(DistrQueryService::new(io.clone(), pool.clone())),
            graph_sync: Arc::new(GraphSyncService::new(
                io.clone(),
                pool.clone(),
                coordination.clone(),
                config.coordination.service.clone(),
            )),
            print: Arc::new(PrintService::new(io.clone(), pool.clone())),
            io,
        });

        coordination
            .register_peer(
                &config.coordination.service,
                &config.peer.peer_id,
                &advertise_addr,
            )
            .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_task = tokio::spawn(server::serve(
            listener,
            services.clone(),
            shutdown_rx.clone(),
        ));
        let heartbeat_task = tokio::spawn(heartbeat(
            coordination.clone(),
            config.coordination.service.clone(),
            config.peer.peer_id.clone(),
            advertise_addr.clone(),
            Duration::from_secs(config.coordination.heartbeat_secs.max(1)),
            shutdown_rx,
        ));

        Ok(Self {
            config,
            coordination,
            services,
            advertise_addr,
            shutdown_tx,
            server_task,
            heartbeat_task,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.config.peer.peer_id
    }

    /// Address other peers dial
    pub fn addr(&self) -> &str {
        &self.advertise_addr
    }

    pub fn services(&self) -> &PeerServices {
        &self.services
    }

    /// Expose a tensor, optionally under a caller-chosen id.
    pub async fn expose_node(&self, t: &Tensor, suggest: Option<String>) -> Result<String> {
        self.services.io.expose_node(t, suggest).await
    }

    /// Resolve an id, reaching out to the owning peer when `recursive`.
    pub async fn lookup_node(&self, id: &str, recursive: bool) -> Result<Tensor> {
        self.services.io.lookup_node(id, recursive).await
    }

    /// Published id of a local tensor, if it has been exposed.
    pub fn lookup_id(&self, t: &Tensor) -> Option<String> {
        self.services.io.lookup_id(t)
    }

    /// Distributed pattern query over the graphs under `roots`.
    pub async fn query(&self, roots: &[Tensor], pattern: &PatternNode) -> Result<Vec<QueryMatch>> {
        self.services.query.query(roots, pattern).await
    }

    /// Load a description across the cluster along a topography.
    pub async fn load_graph(
        &self,
        desc: &GraphDescription,
        topography: &Topography,
    ) -> Result<Vec<Tensor>> {
        self.services.graph_sync.load_graph(desc, topography).await
    }

    /// Merge every peer's exposed graphs into one description.
    pub async fn save_graph(&self) -> Result<(GraphDescription, Topography)> {
        self.services.graph_sync.save_graph().await
    }

    /// Render a tensor tree, splicing in remote fragments.
    pub async fn render(&self, root: &Tensor) -> Result<String> {
        self.services.print.render(root).await
    }

    /// Assign a description's nodes across the registered peers.
    ///
    /// Each connected component is clustered separately; only boundary
    /// nodes appear in the result.
    pub async fn partition(&self, desc: &GraphDescription) -> Result<Topography> {
        self.partition_with(desc, &mut random_selector()).await
    }

    pub async fn partition_with<S: MeanSelector>(
        &self,
        desc: &GraphDescription,
        selector: &mut S,
    ) -> Result<Topography> {
        let peers: Vec<String> = self
            .coordination
            .list_peers(&self.config.coordination.service)
            .await?
            .into_iter()
            .map(|p| p.peer_id)
            .collect();

        let nodes = extract_nodes(desc);
        let mut topography = Topography::new();
        for component in disjoint_graphs(&nodes) {
            topography.extend(kmeans(&peers, &component, selector));
        }
        Ok(topography)
    }

    /// Stop serving and wait for background tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        match self.server_task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "server loop exited with error"),
            Err(e) => tracing::warn!(error = %e, "server task panicked"),
            Ok(Ok(())) => {}
        }
        let _ = self.heartbeat_task.await;
        tracing::info!(peer_id = %self.config.peer.peer_id, "peer stopped");
    }
}

/// Periodic re-registration so directory staleness filters keep the peer
/// listed.
async fn heartbeat(
    coordination: Arc<dyn Coordination>,
    service: String,
    peer_id: String,
    address: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = coordination.register_peer(&service, &peer_id, &address).await {
                    tracing::warn!(error = %e, "heartbeat registration failed");
                }
            }
            changed = shutdown.changed() => {
                // a dropped sender counts as shutdown
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
