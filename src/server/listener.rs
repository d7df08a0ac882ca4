use crate::session::handler::Session;
use crate::session::types::{NodeContext, SessionId};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Runs the accept loop until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, node: Arc<NodeContext>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let role = if node.is_shard() { "shard" } else { "coordinator" };
    tracing::info!(
        "Serving as {} for {} files under {}",
        role,
        node.storage.category(),
        node.storage.root().display()
    );

    let mut sessions = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    sessions.spawn(handle_connection(stream, peer, Arc::clone(&node)));
                }
                Err(e) => tracing::warn!("Failed to accept connection: {}", e),
            },
            _ = &mut shutdown => {
                tracing::info!("Shutting down, {} session(s) still running", sessions.len());
                break;
            }
        }

        while let Some(result) = sessions.try_join_next() {
            log_exit(result);
        }
    }

    sessions.abort_all();
    while let Some(result) = sessions.join_next().await {
        log_exit(result);
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, node: Arc<NodeContext>) {
    let id = SessionId::new();
    let span = tracing::info_span!("session", id = %id, peer = %peer);

    async move {
        tracing::info!("Client connected");

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle: {}", e);
        }

        let (reader, writer) = stream.into_split();
        match Session::new(id, node, reader, writer).run().await {
            Ok(()) => tracing::info!("Client disconnected"),
            Err(e) => tracing::debug!("Connection ended abruptly: {}", e),
        }
    }
    .instrument(span)
    .await
}

fn log_exit(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => tracing::error!("Session task panicked: {}", e),
        Err(e) => tracing::debug!("Session task cancelled: {}", e),
    }
}
