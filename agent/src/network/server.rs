//! Inbound RPC server
//!
//! One task per connection, one request per connection. Unary requests
//! always get a response frame, with failures encoded as wire errors;
//! streaming requests either complete with `Done` or the connection is
//! closed early, which the caller sees as an IO failure.

use crate::errors::Result;
use crate::services::PeerServices;
use crate::wire::{read_frame, write_frame, Request, StreamItem};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Accept connections until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    services: Arc<PeerServices>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // a dropped sender counts as shutdown
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("server shutting down");
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let services = services.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, services).await {
                        tracing::debug!(peer = %addr, error = %e, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, services: Arc<PeerServices>) -> Result<()> {
    let request: Request = read_frame(&mut stream).await?;
    match request {
        Request::StreamAscii { id } => {
            let items = services.handle_stream(&id).await?;
            for item in &items {
                write_frame(&mut stream, item).await?;
            }
            debug_assert!(matches!(items.last(), Some(StreamItem::Done)));
            Ok(())
        }
        request => {
            let response = services.handle(request).await;
            write_frame(&mut stream, &response).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::coordination::MemoryCoordination;
    use crate::network::ClientPool;
    use crate::services::{DistrQueryService, GraphSyncService, NodeIoService, PrintService};
    use std::time::Duration;

    fn services() -> Arc<PeerServices> {
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
            coord.clone(),
            pool.clone(),
            1,
            Duration::from_millis(1),
        ));
        Arc::new(PeerServices {
            query: Arc::new(DistrQueryService::new(io.clone(), pool.clone())),
            graph_sync: Arc::new(GraphSyncService::new(
                io.clone(),
                pool.clone(),
                coord,
                "graphmesh",
            )),
            print: Arc::new(PrintService::new(io.clone(), pool)),
            io,
        })
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_accept_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(serve(listener, services(), rx));

        tx.send(true).unwrap();
        let joined = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("server loop still running");
        assert!(joined.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_accept_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(serve(listener, services(), rx));

        drop(tx);
        let joined = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("server loop still running");
        assert!(joined.unwrap().is_ok());
    }
}
