//! In-memory chunk server.
//!
//! Blocks are append-only: a chunk must start exactly where the block currently
//! ends, and a chunk flagged `is_last` seals the block. Every accepted or refused
//! write is recorded so tests can check what the client put on the wire.

use crate::meta::InMemoryNameServer;
use crate::rpc::Service;
use crate::rpc::proto::{Message, StatusCode, WriteBlockRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One write as received by the chunk server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub block_id: i64,
    pub offset: i64,
    pub len: usize,
    pub is_last: bool,
    pub chunkservers: Vec<String>,
}

#[derive(Default)]
struct StoredBlock {
    data: Vec<u8>,
    sealed: bool,
}

struct ChunkState {
    blocks: HashMap<i64, StoredBlock>,
    writes: Vec<RecordedWrite>,
    pass_writes: usize,
    fail_writes: usize,
    fail_status: StatusCode,
}

impl Default for ChunkState {
    fn default() -> Self {
        Self {
            blocks: HashMap::new(),
            writes: Vec::new(),
            pass_writes: 0,
            fail_writes: 0,
            fail_status: StatusCode::WRITE_FAILED,
        }
    }
}

pub struct InMemoryChunkServer {
    addr: String,
    reporter: Option<Arc<InMemoryNameServer>>,
    state: Mutex<ChunkState>,
}

impl InMemoryChunkServer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            reporter: None,
            state: Mutex::new(ChunkState::default()),
        }
    }

    /// Report sealed blocks and their sizes to `nameserver`.
    pub fn with_reporter(self, nameserver: Arc<InMemoryNameServer>) -> Self {
        Self {
            reporter: Some(nameserver),
            ..self
        }
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    fn lock(&self) -> MutexGuard<'_, ChunkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `n` writes with `status`, blaming the first downstream
    /// member (or this server when it is the tail).
    pub fn fail_next_writes(&self, n: usize, status: StatusCode) {
        self.fail_writes_after(0, n, status);
    }

    /// Like `fail_next_writes`, but let `ok` writes through first.
    pub fn fail_writes_after(&self, ok: usize, n: usize, status: StatusCode) {
        let mut state = self.lock();
        state.pass_writes = ok;
        state.fail_writes = n;
        state.fail_status = status;
    }

    /// Seed a sealed block, as if it had been written earlier.
    pub fn put_block(&self, block_id: i64, data: Vec<u8>) {
        self.lock()
            .blocks
            .insert(block_id, StoredBlock { data, sealed: true });
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    pub fn block_data(&self, block_id: i64) -> Option<Vec<u8>> {
        self.lock().blocks.get(&block_id).map(|b| b.data.clone())
    }

    pub fn is_sealed(&self, block_id: i64) -> bool {
        self.lock()
            .blocks
            .get(&block_id)
            .is_some_and(|b| b.sealed)
    }

    fn write_block(&self, request: WriteBlockRequest) -> Message {
        let WriteBlockRequest {
            sequence_id,
            block_id,
            offset,
            is_last,
            chunkservers,
            data,
        } = request;
        debug!(
            addr = %self.addr,
            block_id,
            offset,
            len = data.len(),
            is_last,
            seq = sequence_id,
            "chunk received"
        );

        let mut state = self.lock();
        state.writes.push(RecordedWrite {
            block_id,
            offset,
            len: data.len(),
            is_last,
            chunkservers: chunkservers.clone(),
        });

        if state.pass_writes > 0 {
            state.pass_writes -= 1;
        } else if state.fail_writes > 0 {
            state.fail_writes -= 1;
            let bad = chunkservers
                .first()
                .cloned()
                .unwrap_or_else(|| self.addr.clone());
            return Message::WriteAck {
                status: state.fail_status,
                bad_chunkserver: Some(bad),
            };
        }

        let block = state.blocks.entry(block_id).or_default();
        if block.sealed || offset != block.data.len() as i64 {
            return Message::WriteAck {
                status: StatusCode::BAD_PARAMETER,
                bad_chunkserver: Some(self.addr.clone()),
            };
        }
        block.data.extend_from_slice(&data);
        block.sealed = is_last;
        let size = block.data.len() as i64;
        drop(state);

        if is_last {
            if let Some(ns) = &self.reporter {
                ns.block_received(block_id, size);
            }
        }
        Message::WriteAck {
            status: StatusCode::OK,
            bad_chunkserver: None,
        }
    }

    fn read_block(&self, block_id: i64, offset: i64, read_len: i64) -> Message {
        let state = self.lock();
        let Some(block) = state.blocks.get(&block_id) else {
            return Message::BlockData {
                status: StatusCode::NOT_FOUND,
                data: Vec::new(),
            };
        };
        if offset < 0 || read_len < 0 {
            return Message::BlockData {
                status: StatusCode::BAD_PARAMETER,
                data: Vec::new(),
            };
        }
        let start = (offset as usize).min(block.data.len());
        let end = start.saturating_add(read_len as usize).min(block.data.len());
        Message::BlockData {
            status: StatusCode::OK,
            data: block.data[start..end].to_vec(),
        }
    }
}

#[async_trait]
impl Service for InMemoryChunkServer {
    async fn handle(&self, request: Message) -> Message {
        match request {
            Message::WriteBlock(request) => self.write_block(*request),
            Message::ReadBlock {
                block_id,
                offset,
                read_len,
            } => self.read_block(block_id, offset, read_len),
            other => Message::Error(format!("chunk server cannot handle {}", other.name())),
        }
    }
}
