//! TCP transport: each message is a bincode-encoded `Message` in a length-delimited
//! frame. A channel opens a connection per concurrent call and keeps a few idle
//! ones around for reuse, so callers sharing a channel never queue behind each other.

use super::proto::Message;
use super::{Channel, Transport};
use crate::error::RpcError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Largest accepted frame; comfortably above one write buffer plus headers.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Idle connections kept per channel; extra ones are closed when returned.
pub const MAX_IDLE_CONNECTIONS: usize = 8;

pub(crate) type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

pub(crate) fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn channel(&self, addr: &str) -> Arc<dyn Channel> {
        Arc::new(TcpChannel::new(addr))
    }
}

pub struct TcpChannel {
    addr: String,
    idle: Mutex<Vec<MessageStream>>,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Connections currently parked for reuse.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn checkout(&self) -> Option<MessageStream> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn checkin(&self, stream: MessageStream) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_CONNECTIONS {
                idle.push(stream);
            }
        }
    }

    async fn connect(&self) -> Result<MessageStream, RpcError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| RpcError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(addr = %self.addr, "set_nodelay failed: {e}");
        }
        Ok(Framed::new(stream, frame_codec()))
    }
}

#[async_trait]
impl Channel for TcpChannel {
    fn address(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: Message) -> Result<Message, RpcError> {
        let payload = Bytes::from(bincode::serialize(&request)?);
        // A stream is only returned after a complete exchange; one dropped
        // mid-call (timeout) or failed is closed instead.
        let mut stream = match self.checkout() {
            Some(stream) => stream,
            None => self.connect().await?,
        };
        let response = exchange(&mut stream, payload, &self.addr).await?;
        self.checkin(stream);
        Ok(response)
    }
}

async fn exchange(
    stream: &mut MessageStream,
    payload: Bytes,
    addr: &str,
) -> Result<Message, RpcError> {
    stream.send(payload).await.map_err(|source| RpcError::Io {
        addr: addr.to_string(),
        source,
    })?;
    match stream.next().await {
        Some(Ok(frame)) => Ok(bincode::deserialize(&frame)?),
        Some(Err(source)) => Err(RpcError::Io {
            addr: addr.to_string(),
            source,
        }),
        None => Err(RpcError::Closed {
            addr: addr.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::ChunkServerClient;
    use crate::config::CallPolicy;
    use crate::rpc::proto::{StatusCode, WriteBlockRequest};
    use crate::rpc::server::spawn_server;
    use crate::rpc::{RpcClient, Service};
    use std::time::{Duration, Instant};

    struct Echo;

    #[async_trait]
    impl Service for Echo {
        async fn handle(&self, request: Message) -> Message {
            match request {
                Message::Stat { path } => Message::Error(path),
                _ => Message::Status(StatusCode::OK),
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_reuses_connection() {
        let (addr, server) = spawn_server("127.0.0.1:0", Arc::new(Echo)).await.unwrap();
        let channel = TcpChannel::new(addr.to_string());

        let resp = channel
            .call(Message::Stat {
                path: "/hello".into(),
            })
            .await
            .unwrap();
        assert_eq!(resp, Message::Error("/hello".into()));

        let resp = channel
            .call(Message::Unlink { path: "/x".into() })
            .await
            .unwrap();
        assert_eq!(resp, Message::Status(StatusCode::OK));
        assert_eq!(channel.idle_connections(), 1);

        server.abort();
    }

    /// Answers `WriteBlock` slowly and everything else at once.
    struct SlowWrites;

    #[async_trait]
    impl Service for SlowWrites {
        async fn handle(&self, request: Message) -> Message {
            match request {
                Message::WriteBlock(_) => {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    Message::WriteAck {
                        status: StatusCode::OK,
                        bad_chunkserver: None,
                    }
                }
                Message::ReadBlock { .. } => Message::BlockData {
                    status: StatusCode::OK,
                    data: b"ok".to_vec(),
                },
                _ => Message::Status(StatusCode::OK),
            }
        }
    }

    #[tokio::test]
    async fn test_calls_on_one_address_run_in_parallel() {
        let (addr, server) = spawn_server("127.0.0.1:0", Arc::new(SlowWrites))
            .await
            .unwrap();
        let rpc = Arc::new(RpcClient::new(Arc::new(TcpTransport)));
        let writer = ChunkServerClient::connect(rpc.clone(), &addr.to_string()).await;
        let reader = ChunkServerClient::connect(rpc.clone(), &addr.to_string()).await;

        let write = tokio::spawn(async move {
            let request = WriteBlockRequest {
                sequence_id: 1,
                block_id: 7,
                offset: 0,
                is_last: false,
                chunkservers: Vec::new(),
                data: vec![1; 16],
            };
            writer
                .write_block(request, CallPolicy::from_secs(5, 1))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let data = reader
            .read_block(7, 0, 2, CallPolicy::new(Duration::from_millis(100), 1))
            .await
            .unwrap();
        assert_eq!(data, b"ok");
        assert!(started.elapsed() < Duration::from_millis(300));

        write.await.unwrap().unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to obtain a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = TcpChannel::new(addr.to_string());
        let err = channel
            .call(Message::Stat { path: "/".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Connect { .. }));
        assert!(err.is_retryable());
    }
}
