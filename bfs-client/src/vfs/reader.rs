//! Read handles.
//!
//! Reads are served from the first block of the location set resolved at open
//! time, through its first replica. Files written by this client never span more
//! than one block, so a read past the end of that block simply comes back short.

use super::client::ClientInner;
use crate::block::LocatedBlocks;
use crate::cadapter::ChunkServerClient;
use crate::error::{FsError, Result};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct ReadState {
    replica: Option<ChunkServerClient>,
    cursor: u64,
    closed: bool,
}

/// Read-only handle with its own cursor. `pread` does not move the cursor.
pub struct ReadHandle {
    path: String,
    inner: Arc<ClientInner>,
    located: LocatedBlocks,
    state: Mutex<ReadState>,
}

impl ReadHandle {
    pub(crate) fn new(path: &str, inner: Arc<ClientInner>, located: LocatedBlocks) -> Self {
        Self {
            path: path.to_string(),
            inner,
            located,
            state: Mutex::new(ReadState {
                replica: None,
                cursor: 0,
                closed: false,
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Block locations resolved when the handle was opened.
    pub fn locations(&self) -> &LocatedBlocks {
        &self.located
    }

    async fn pread_locked(&self, state: &mut ReadState, buf: &mut [u8], offset: u64) -> Result<usize> {
        let Some(block) = self.located.first_readable() else {
            return Err(FsError::NoLocation {
                path: self.path.clone(),
            });
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let offset = i64::try_from(offset)
            .map_err(|_| FsError::InvalidArgument(format!("read offset {offset} out of range")))?;

        let replica = match state.replica.take() {
            Some(replica) => replica,
            None => {
                // first_readable guarantees a non-empty chain
                let addr = block.chain_head().unwrap_or_default();
                ChunkServerClient::connect(self.inner.rpc.clone(), addr).await
            }
        };
        let replica = state.replica.insert(replica);

        let data = replica
            .read_block(block.block_id, offset, buf.len(), self.inner.config.read_block)
            .await?;
        buf[..data.len()].copy_from_slice(&data);
        debug!(
            path = %self.path,
            block_id = block.block_id,
            offset,
            requested = buf.len(),
            delivered = data.len(),
            "pread"
        );
        Ok(data.len())
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns fewer near the end of the
    /// block and 0 past it.
    pub async fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::Closed);
        }
        self.pread_locked(&mut state, buf, offset).await
    }

    /// `pread` at the cursor, advancing it by the bytes delivered.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::Closed);
        }
        let cursor = state.cursor;
        let n = self.pread_locked(&mut state, buf, cursor).await?;
        state.cursor += n as u64;
        Ok(n)
    }

    /// Move the cursor. `SeekFrom::End` is not supported, and neither is a position
    /// before the start; both leave the cursor where it was.
    pub async fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::Closed);
        }
        let next = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => state.cursor.checked_add_signed(delta),
            SeekFrom::End(_) => {
                return Err(FsError::InvalidArgument(
                    "seek relative to end of file is not supported".into(),
                ));
            }
        };
        let Some(next) = next else {
            return Err(FsError::InvalidArgument(format!(
                "seek {pos:?} from {} leaves the file",
                state.cursor
            )));
        };
        state.cursor = next;
        Ok(next)
    }

    pub async fn position(&self) -> u64 {
        self.state.lock().await.cursor
    }

    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::Closed);
        }
        state.closed = true;
        state.replica = None;
        Ok(())
    }
}
