//! Peer-facing services and the request dispatcher

pub mod graph_sync;
pub mod io;
pub mod print;
pub mod query;

pub use graph_sync::GraphSyncService;
pub use io::NodeIoService;
pub use print::PrintService;
pub use query::DistrQueryService;

use crate::errors::{MeshError, Result};
use crate::wire::{Request, Response, StreamItem};
use std::sync::Arc;

/// Everything a peer serves to the rest of the cluster
pub struct PeerServices {
    pub io: Arc<NodeIoService>,
    pub query: Arc<DistrQueryService>,
    pub graph_sync: Arc<GraphSyncService>,
    pub print: Arc<PrintService>,
}

impl PeerServices {
    /// Handle a unary request; errors become wire errors, never a dropped
    /// connection.
    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                Response::from_error(&e)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::DescribeNodes { ids } => Ok(Response::Nodes(self.io.describe(&ids))),
            Request::PatternQuery { pattern, roots } => Ok(Response::Matches(
                self.query.handle_pattern_query(&pattern, &roots).await?,
            )),
            Request::LoadGraph { graph, refs } => Ok(Response::Loaded(
                self.graph_sync.handle_load_graph(graph, refs).await?,
            )),
            Request::SaveGraph => {
                let (graph, topography) = self.graph_sync.handle_save_graph()?;
                Ok(Response::Saved { graph, topography })
            }
            Request::UpdateData { id, version, bytes } => Ok(Response::Updated {
                applied: self.io.apply_data_update(&id, &bytes, version),
            }),
            Request::StreamAscii { .. } => Err(MeshError::InternalInconsistency(
                "streaming request reached the unary dispatcher".into(),
            )),
        }
    }

    /// Handle a streaming request: fragments, then `Done`.
    pub async fn handle_stream(&self, id: &str) -> Result<Vec<StreamItem>> {
        let (id, text) = self.print.handle_stream_ascii(id).await?;
        Ok(vec![StreamItem::Fragment { id, text }, StreamItem::Done])
    }
}
