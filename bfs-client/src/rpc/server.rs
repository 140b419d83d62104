//! Accept loop hosting a `Service` over the TCP framing used by `TcpChannel`.

use super::Service;
use super::proto::Message;
use super::tcp::frame_codec;
use crate::error::RpcError;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Serve `service` on `listener` until accepting fails. Each connection runs on its
/// own task and handles its requests one after another.
pub async fn serve(listener: TcpListener, service: Arc<dyn Service>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "connection accepted");
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, service).await {
                warn!(%peer, "connection closed with error: {e}");
            }
        });
    }
}

/// Bind `addr` and serve `service` in the background. Returns the bound address,
/// useful with port 0.
pub async fn spawn_server(
    addr: impl ToSocketAddrs,
    service: Arc<dyn Service>,
) -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, service).await {
            warn!(addr = %local, "accept loop stopped: {e}");
        }
    });
    Ok((local, handle))
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<dyn Service>,
) -> Result<(), RpcError> {
    let addr = peer.to_string();
    let mut framed = Framed::new(stream, frame_codec());
    while let Some(frame) = framed.next().await {
        let frame = frame.map_err(|source| RpcError::Io {
            addr: addr.clone(),
            source,
        })?;
        let response = match bincode::deserialize::<Message>(&frame) {
            Ok(request) => service.handle(request).await,
            Err(e) => Message::Error(format!("malformed request: {e}")),
        };
        let payload = Bytes::from(bincode::serialize(&response)?);
        framed.send(payload).await.map_err(|source| RpcError::Io {
            addr: addr.clone(),
            source,
        })?;
    }
    Ok(())
}
