//! Write handles and the chained block write protocol.
//!
//! A write handle allocates one block on its first write and stages data in a
//! fixed-capacity buffer. A full buffer is sent to the head of the block's replica
//! chain as one chunk, starting at the block's current size. Closing sends whatever
//! is left, possibly nothing, as the final chunk that seals the block; a handle
//! closed without writing still allocates its block so the file can be read back.

use super::client::ClientInner;
use crate::block::{LocatedBlock, WriteBuffer};
use crate::cadapter::ChunkServerClient;
use crate::error::{FsError, Result};
use crate::rpc::proto::{StatusCode, WriteBlockRequest};
use crate::util::sequence_id;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// The block a handle is filling, its chain head and the bytes not yet sent.
struct ActiveBlock {
    located: LocatedBlock,
    chain_head: ChunkServerClient,
    buffer: WriteBuffer,
}

#[derive(Default)]
struct WriteState {
    block: Option<ActiveBlock>,
    closed: bool,
}

impl ClientInner {
    async fn allocate_block(&self, path: &str) -> Result<ActiveBlock> {
        let located = self.nameserver.add_block(path).await?;
        let Some(head) = located.chain_head() else {
            warn!(path, block_id = located.block_id, "allocated block has no replicas");
            return Err(FsError::Status {
                op: "add block",
                target: path.to_string(),
                status: StatusCode::INTERNAL,
            });
        };
        let chain_head = ChunkServerClient::connect(self.rpc.clone(), head).await;
        debug!(
            path,
            block_id = located.block_id,
            chain = ?located.chains,
            "block allocated"
        );
        Ok(ActiveBlock {
            located,
            chain_head,
            buffer: WriteBuffer::new(self.config.write_buffer_size),
        })
    }

    /// Stage `data`, sending every buffer that fills up along the way.
    ///
    /// When a send fails, the bytes of `data` that went with it are unstaged again
    /// and the error reports how many bytes of `data` were sent before it.
    async fn write_file(&self, path: &str, state: &mut WriteState, data: &[u8]) -> Result<usize> {
        let active = match state.block.take() {
            Some(active) => active,
            None => self.allocate_block(path).await?,
        };
        let active = state.block.insert(active);

        let mut accepted = 0;
        let mut rest = data;
        while !rest.is_empty() {
            let available = active.buffer.available();
            if rest.len() < available {
                active.buffer.append(rest)?;
                break;
            }
            let staged = active.buffer.len();
            let (head, tail) = rest.split_at(available);
            active.buffer.append(head)?;
            if let Err(e) = self.write_chunk(active, false).await {
                active.buffer.truncate(staged);
                warn!(path, accepted, unsent = data.len() - accepted, "write failed: {e}");
                return Err(if accepted == 0 {
                    e
                } else {
                    FsError::ShortWrite {
                        accepted,
                        source: Box::new(e),
                    }
                });
            }
            accepted += head.len();
            rest = tail;
        }
        Ok(data.len())
    }

    /// Send the staged bytes as one chunk. The buffer and block size only change
    /// once the chain head acknowledged.
    async fn write_chunk(&self, active: &mut ActiveBlock, is_last: bool) -> Result<()> {
        let request = WriteBlockRequest {
            sequence_id: sequence_id(),
            block_id: active.located.block_id,
            offset: active.located.block_size,
            is_last,
            chunkservers: active.located.downstream().to_vec(),
            data: active.buffer.data().to_vec(),
        };
        let len = request.data.len();
        active
            .chain_head
            .write_block(request, self.config.write_block)
            .await?;
        active.located.advance(len);
        active.buffer.clear();
        Ok(())
    }

    /// Send the final chunk and mark the handle closed, even if sending fails.
    async fn close_block(&self, path: &str, state: &mut WriteState) -> Result<()> {
        state.closed = true;
        match state.block.as_mut() {
            Some(active) => {
                let result = self.write_chunk(active, true).await;
                debug!(
                    path,
                    block_id = active.located.block_id,
                    block_size = active.located.block_size,
                    ok = result.is_ok(),
                    "block closed"
                );
                result
            }
            None => {
                // Nothing written yet: the file still gets its one sealed block.
                let mut active = self.allocate_block(path).await?;
                let result = self.write_chunk(&mut active, true).await;
                debug!(
                    path,
                    block_id = active.located.block_id,
                    ok = result.is_ok(),
                    "empty block closed"
                );
                state.block = Some(active);
                result
            }
        }
    }
}

/// Write-only handle. Operations on one handle are serialized; separate handles
/// are independent, even on the same path.
pub struct WriteHandle {
    path: String,
    inner: Arc<ClientInner>,
    state: Arc<Mutex<WriteState>>,
}

impl WriteHandle {
    pub(crate) fn new(path: &str, inner: Arc<ClientInner>) -> Self {
        Self {
            path: path.to_string(),
            inner,
            state: Arc::new(Mutex::new(WriteState::default())),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Accept all of `data`, returning its length. Bytes may stay buffered until the
    /// next full buffer, `sync` or `close`. On failure nothing of `data` stays
    /// buffered; `FsError::accepted` tells how much of it was already sent.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let _timer = self.inner.timer("write", &self.path);
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::Closed);
        }
        self.inner.write_file(&self.path, &mut state, data).await
    }

    /// Send buffered bytes as a non-final chunk. Nothing buffered is a no-op.
    pub async fn sync(&self) -> Result<()> {
        let _timer = self.inner.timer("sync", &self.path);
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::Closed);
        }
        match state.block.as_mut() {
            Some(active) if !active.buffer.is_empty() => {
                self.inner.write_chunk(active, false).await
            }
            _ => Ok(()),
        }
    }

    pub async fn flush(&self) -> Result<()> {
        self.sync().await
    }

    /// Seal the block with a final chunk. A handle closes once; later calls fail.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::Closed);
        }
        self.inner.close_block(&self.path, &mut state).await
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// The block being written, with the size acknowledged so far.
    pub async fn current_block(&self) -> Option<LocatedBlock> {
        let state = self.state.lock().await;
        state.block.as_ref().map(|a| a.located.clone())
    }

    /// Bytes accepted but not yet sent.
    pub async fn buffered(&self) -> usize {
        let state = self.state.lock().await;
        state.block.as_ref().map_or(0, |a| a.buffer.len())
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            if state.closed {
                return;
            }
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(path = %self.path, "write handle dropped outside a runtime; buffered data is lost");
            return;
        };
        let path = std::mem::take(&mut self.path);
        let inner = self.inner.clone();
        let state = self.state.clone();
        runtime.spawn(async move {
            let mut state = state.lock().await;
            if state.closed {
                return;
            }
            if let Err(e) = inner.close_block(&path, &mut state).await {
                warn!(path, "close on drop failed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::RecordedWrite;
    use crate::config::ClientConfig;
    use crate::error::ErrorKind;
    use crate::local::MemoryCluster;
    use crate::vfs::FileSystemClient;
    use std::time::Duration;

    const KIB: usize = 1024;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn setup(replicas: usize) -> (MemoryCluster, FileSystemClient) {
        let cluster = MemoryCluster::new(replicas);
        let client = cluster.client(ClientConfig::default()).await.unwrap();
        (cluster, client)
    }

    /// (offset, len, is_last) of every chunk the chain head received.
    fn chunks(writes: &[RecordedWrite]) -> Vec<(i64, usize, bool)> {
        writes
            .iter()
            .map(|w| (w.offset, w.len, w.is_last))
            .collect()
    }

    #[tokio::test]
    async fn test_single_large_write_flushes_one_buffer() {
        let (cluster, client) = setup(3).await;
        client.create_directory("/d").await.unwrap();
        let w = client.open_write("/d/f").await.unwrap();
        let data = pattern(300 * KIB);

        assert_eq!(w.write(&data).await.unwrap(), 300 * KIB);
        assert_eq!(w.buffered().await, 44 * KIB);
        assert_eq!(
            chunks(&cluster.head().writes()),
            vec![(0, 256 * KIB, false)]
        );

        w.close().await.unwrap();
        let writes = cluster.head().writes();
        assert_eq!(
            chunks(&writes),
            vec![(0, 256 * KIB, false), ((256 * KIB) as i64, 44 * KIB, true)]
        );
        // the head forwards to the rest of the chain
        assert_eq!(
            writes[0].chunkservers,
            cluster.chain()[1..].to_vec()
        );
        let block = w.current_block().await.unwrap();
        assert_eq!(block.block_size, (300 * KIB) as i64);
        assert_eq!(cluster.head().block_data(block.block_id).unwrap(), data);
    }

    #[tokio::test]
    async fn test_small_writes_partition_the_block() {
        let (cluster, client) = setup(2).await;
        let config = ClientConfig::default().write_buffer_size(10);
        let client = FileSystemClient::with_transport(
            client.nameserver_addr(),
            Arc::new(cluster.transport.clone()),
            config,
        )
        .await
        .unwrap();
        let w = client.open_write("/f").await.unwrap();
        let mut expected = Vec::new();
        for len in [3usize, 7, 10, 1, 25, 0, 4] {
            let piece = pattern(len + expected.len())[expected.len()..].to_vec();
            w.write(&piece).await.unwrap();
            expected.extend_from_slice(&piece);
        }
        w.close().await.unwrap();

        let writes = cluster.head().writes();
        let mut next = 0i64;
        for write in &writes {
            assert_eq!(write.offset, next);
            next += write.len as i64;
        }
        assert_eq!(next as usize, expected.len());
        assert_eq!(writes.iter().filter(|w| w.is_last).count(), 1);
        assert!(writes.last().unwrap().is_last);

        let block_id = writes[0].block_id;
        assert_eq!(cluster.head().block_data(block_id).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_close_sends_empty_final_chunk() {
        let (cluster, client) = setup(1).await;
        let w = client.open_write("/f").await.unwrap();
        w.write(&pattern(256 * KIB)).await.unwrap();
        assert_eq!(w.buffered().await, 0);
        w.close().await.unwrap();
        assert_eq!(
            chunks(&cluster.head().writes()),
            vec![(0, 256 * KIB, false), ((256 * KIB) as i64, 0, true)]
        );
    }

    #[tokio::test]
    async fn test_sync_sends_non_final_chunk() {
        let (cluster, client) = setup(1).await;
        let w = client.open_write("/f").await.unwrap();
        // nothing staged yet
        w.sync().await.unwrap();
        w.write(b"abc").await.unwrap();
        w.sync().await.unwrap();
        w.flush().await.unwrap();
        w.write(b"de").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(
            chunks(&cluster.head().writes()),
            vec![(0, 3, false), (3, 2, true)]
        );
    }

    #[tokio::test]
    async fn test_close_is_once() {
        let (cluster, client) = setup(1).await;
        let w = client.open_write("/f").await.unwrap();
        w.write(b"x").await.unwrap();
        w.close().await.unwrap();
        assert!(w.is_closed().await);
        assert!(matches!(w.close().await, Err(FsError::Closed)));
        assert!(matches!(w.write(b"y").await, Err(FsError::Closed)));
        assert!(matches!(w.sync().await, Err(FsError::Closed)));
        assert_eq!(cluster.head().writes().len(), 1);
    }

    #[tokio::test]
    async fn test_close_without_writes_seals_empty_block() {
        let (cluster, client) = setup(1).await;
        let w = client.open_write("/f").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(chunks(&cluster.head().writes()), vec![(0, 0, true)]);
        let block_id = w.current_block().await.unwrap().block_id;
        assert!(cluster.head().is_sealed(block_id));
        assert_eq!(cluster.nameserver.file_blocks("/f"), Some(vec![block_id]));
        assert_eq!(client.file_size("/f").await.unwrap(), 0);

        let r = client.open_read("/f").await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_chunk_failure_is_reported() {
        let (cluster, client) = setup(2).await;
        let w = client.open_write("/f").await.unwrap();
        w.write(b"abc").await.unwrap();
        cluster
            .head()
            .fail_next_writes(1, StatusCode::WRITE_FAILED);

        let err = w.sync().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status);
        match &err {
            FsError::ChunkWrite {
                bad_chunkserver, ..
            } => assert_eq!(bad_chunkserver.as_deref(), Some(cluster.chain()[1].as_str())),
            other => panic!("unexpected {other:?}"),
        }
        // nothing was consumed, so the retry resends the same bytes at the same offset
        assert_eq!(w.buffered().await, 3);
        assert_eq!(w.current_block().await.unwrap().block_size, 0);
        w.sync().await.unwrap();
        assert_eq!(
            chunks(&cluster.head().writes()),
            vec![(0, 3, false), (0, 3, false)]
        );
    }

    async fn small_buffer_client(cluster: &MemoryCluster, size: usize) -> FileSystemClient {
        let config = ClientConfig::default().write_buffer_size(size);
        cluster.client(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_failed_write_can_be_retried() {
        let cluster = MemoryCluster::new(1);
        let client = small_buffer_client(&cluster, 10).await;
        let w = client.open_write("/f").await.unwrap();
        w.write(b"aaaaa").await.unwrap();
        cluster
            .head()
            .fail_next_writes(1, StatusCode::WRITE_FAILED);

        let err = w.write(b"bbbbbbbbbb").await.unwrap_err();
        assert!(matches!(err, FsError::ChunkWrite { .. }));
        assert_eq!(err.accepted(), 0);
        // earlier writes stay staged, this one's bytes do not
        assert_eq!(w.buffered().await, 5);

        w.write(b"bbbbbbbbbb").await.unwrap();
        w.close().await.unwrap();
        let block_id = w.current_block().await.unwrap().block_id;
        assert_eq!(
            cluster.head().block_data(block_id).unwrap(),
            b"aaaaabbbbbbbbbb"
        );
    }

    #[tokio::test]
    async fn test_failed_write_reports_bytes_sent() {
        let cluster = MemoryCluster::new(1);
        let client = small_buffer_client(&cluster, 4).await;
        let w = client.open_write("/f").await.unwrap();
        w.write(b"ab").await.unwrap();

        // "abcd" goes out, "efgh" is refused
        cluster
            .head()
            .fail_writes_after(1, 1, StatusCode::WRITE_FAILED);
        let err = w.write(b"cdefghij").await.unwrap_err();
        assert!(matches!(err, FsError::ShortWrite { .. }));
        assert_eq!(err.accepted(), 2);
        assert_eq!(err.kind(), ErrorKind::Status);
        assert_eq!(w.buffered().await, 0);
        assert_eq!(w.current_block().await.unwrap().block_size, 4);

        w.write(b"efghij").await.unwrap();
        w.close().await.unwrap();
        let block_id = w.current_block().await.unwrap().block_id;
        assert_eq!(cluster.head().block_data(block_id).unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn test_failed_close_still_closes() {
        let (cluster, client) = setup(1).await;
        let w = client.open_write("/f").await.unwrap();
        w.write(b"abc").await.unwrap();
        cluster
            .head()
            .fail_next_writes(1, StatusCode::WRITE_FAILED);
        assert!(w.close().await.is_err());
        assert!(w.is_closed().await);
        assert!(matches!(w.close().await, Err(FsError::Closed)));
    }

    #[tokio::test]
    async fn test_concurrent_writes_do_not_interleave() {
        let (cluster, client) = setup(1).await;
        let config = ClientConfig::default().write_buffer_size(7);
        let client = FileSystemClient::with_transport(
            client.nameserver_addr(),
            Arc::new(cluster.transport.clone()),
            config,
        )
        .await
        .unwrap();
        let w = Arc::new(client.open_write("/f").await.unwrap());
        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let w = w.clone();
            tasks.push(tokio::spawn(async move {
                w.write(&[i; 20]).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        w.close().await.unwrap();

        let block_id = w.current_block().await.unwrap().block_id;
        let data = cluster.head().block_data(block_id).unwrap();
        assert_eq!(data.len(), 160);
        // every write lands as one contiguous run
        for run in data.chunks(20) {
            assert!(run.iter().all(|b| *b == run[0]));
        }
    }

    #[tokio::test]
    async fn test_drop_closes_handle() {
        let (cluster, client) = setup(1).await;
        let w = client.open_write("/f").await.unwrap();
        w.write(b"tail").await.unwrap();
        drop(w);

        let mut sealed = false;
        for _ in 0..100 {
            let writes = cluster.head().writes();
            if writes.last().is_some_and(|w| w.is_last) {
                sealed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sealed);
        assert_eq!(client.file_size("/f").await.unwrap(), 4);
    }
}
