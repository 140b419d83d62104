//! Chunk server adapter
//!
//! Responsibilities:
//! - Send block chunks to a chain head and read byte ranges back from a replica.
//! - Turn a refused write into `FsError::ChunkWrite` carrying the chain member the
//!   head blamed, and a refused read into `FsError::ChunkRead`.
//!
//! Submodules:
//! - `memory`: in-memory chunk server used by tests and the local cluster

pub mod memory;

pub use memory::InMemoryChunkServer;

use crate::config::CallPolicy;
use crate::error::{FsError, Result, RpcError};
use crate::rpc::proto::{Message, WriteBlockRequest};
use crate::rpc::{Channel, RpcClient};
use std::sync::Arc;
use tracing::{debug, warn};

/// Endpoint of one chunk server. Cheap to clone; the channel is shared through the
/// client's stub cache.
#[derive(Clone)]
pub struct ChunkServerClient {
    rpc: Arc<RpcClient>,
    channel: Arc<dyn Channel>,
}

impl ChunkServerClient {
    pub async fn connect(rpc: Arc<RpcClient>, addr: &str) -> Self {
        let channel = rpc.get_stub(addr).await;
        Self { rpc, channel }
    }

    pub fn address(&self) -> &str {
        self.channel.address()
    }

    fn rpc_error(&self, op: &'static str, block_id: i64, source: RpcError) -> FsError {
        FsError::Rpc {
            op,
            target: format!("block {block_id} on {}", self.address()),
            source,
        }
    }

    fn unexpected(&self, op: &'static str, block_id: i64, response: Message) -> FsError {
        let detail = match response {
            Message::Error(msg) => msg,
            other => format!("got {}", other.name()),
        };
        self.rpc_error(
            op,
            block_id,
            RpcError::UnexpectedResponse {
                addr: self.address().to_string(),
                detail,
            },
        )
    }

    /// Send one chunk to this chain head, which forwards it down `request.chunkservers`.
    pub async fn write_block(&self, request: WriteBlockRequest, policy: CallPolicy) -> Result<()> {
        let block_id = request.block_id;
        let offset = request.offset;
        let len = request.data.len();
        debug!(
            addr = self.address(),
            block_id,
            offset,
            len,
            is_last = request.is_last,
            seq = request.sequence_id,
            "write block"
        );
        let response = self
            .rpc
            .send_request(
                self.channel.as_ref(),
                Message::WriteBlock(Box::new(request)),
                policy,
            )
            .await
            .map_err(|e| {
                warn!(addr = self.address(), block_id, offset, "write block failed: {e}");
                self.rpc_error("write block", block_id, e)
            })?;
        match response {
            Message::WriteAck { status, .. } if status.is_ok() => Ok(()),
            Message::WriteAck {
                status,
                bad_chunkserver,
            } => {
                warn!(
                    addr = self.address(),
                    block_id,
                    offset,
                    %status,
                    bad_chunkserver = bad_chunkserver.as_deref().unwrap_or("unknown"),
                    "write block refused"
                );
                Err(FsError::ChunkWrite {
                    block_id,
                    offset,
                    status,
                    bad_chunkserver,
                })
            }
            other => Err(self.unexpected("write block", block_id, other)),
        }
    }

    /// Read up to `len` bytes of `block_id` starting at `offset`. Fewer bytes come
    /// back at the end of the block.
    pub async fn read_block(
        &self,
        block_id: i64,
        offset: i64,
        len: usize,
        policy: CallPolicy,
    ) -> Result<Vec<u8>> {
        let request = Message::ReadBlock {
            block_id,
            offset,
            read_len: len as i64,
        };
        let response = self
            .rpc
            .send_request(self.channel.as_ref(), request, policy)
            .await
            .map_err(|e| {
                warn!(addr = self.address(), block_id, offset, "read block failed: {e}");
                self.rpc_error("read block", block_id, e)
            })?;
        match response {
            Message::BlockData { status, data } if status.is_ok() => {
                if data.len() > len {
                    return Err(self.rpc_error(
                        "read block",
                        block_id,
                        RpcError::UnexpectedResponse {
                            addr: self.address().to_string(),
                            detail: format!("asked for {len} bytes, got {}", data.len()),
                        },
                    ));
                }
                Ok(data)
            }
            Message::BlockData { status, .. } => Err(FsError::ChunkRead { block_id, status }),
            other => Err(self.unexpected("read block", block_id, other)),
        }
    }
}
