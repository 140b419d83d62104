//! File system client: namespace operations and opening files.

use super::handles::{FileHandle, OpenMode};
use super::reader::ReadHandle;
use super::writer::WriteHandle;
use crate::config::ClientConfig;
use crate::error::{FsError, Result};
use crate::meta::NameServerClient;
use crate::rpc::proto::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, FileInfo};
use crate::rpc::tcp::TcpTransport;
use crate::rpc::{RpcClient, Transport};
use crate::util::AutoTimer;
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by the client and every handle it opened.
pub(crate) struct ClientInner {
    pub(crate) rpc: Arc<RpcClient>,
    pub(crate) nameserver: NameServerClient,
    pub(crate) config: Arc<ClientConfig>,
}

impl ClientInner {
    pub(crate) fn timer(&self, op: &'static str, target: &str) -> AutoTimer {
        AutoTimer::new(self.config.slow_op_threshold_duration(), op, target)
    }
}

/// Entry point of the client library. Cloning is cheap and clones share the name
/// server channel and the chunk server channel cache.
#[derive(Clone)]
pub struct FileSystemClient {
    inner: Arc<ClientInner>,
}

impl FileSystemClient {
    /// Client talking TCP to the name server at `nameserver`. No connection is made
    /// until the first request.
    pub async fn connect(nameserver: &str, config: ClientConfig) -> Result<Self> {
        Self::with_transport(nameserver, Arc::new(TcpTransport), config).await
    }

    pub async fn with_transport(
        nameserver: &str,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        if nameserver.is_empty() {
            return Err(FsError::InvalidArgument(
                "name server address is empty".into(),
            ));
        }
        config.validate()?;
        let config = Arc::new(config);
        let rpc = Arc::new(RpcClient::new(transport));
        let nameserver = NameServerClient::new(rpc.clone(), nameserver, config.clone()).await;
        info!(nameserver = nameserver.address(), "file system client ready");
        Ok(Self {
            inner: Arc::new(ClientInner {
                rpc,
                nameserver,
                config,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn nameserver_addr(&self) -> &str {
        self.inner.nameserver.address()
    }

    pub async fn create_directory(&self, path: &str) -> Result<()> {
        self.inner
            .nameserver
            .create_file(path, DEFAULT_DIR_MODE)
            .await
    }

    /// Entries of `path` in the order the name server returned them.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        let _timer = self.inner.timer("list directory", path);
        self.inner.nameserver.list_directory(path).await
    }

    pub async fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        self.inner
            .nameserver
            .delete_directory(path, recursive)
            .await
    }

    /// `Ok(false)` when the name server refused the stat, `Err` only when it could
    /// not be asked.
    pub async fn access(&self, path: &str) -> Result<bool> {
        Ok(self.inner.nameserver.stat_status(path).await?.is_ok())
    }

    pub async fn stat(&self, path: &str) -> Result<FileInfo> {
        self.inner.nameserver.stat(path).await
    }

    pub async fn file_size(&self, path: &str) -> Result<i64> {
        Ok(self.stat(path).await?.size)
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.inner.nameserver.unlink(path).await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.inner.nameserver.rename(old_path, new_path).await
    }

    pub async fn open_file(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        match mode {
            OpenMode::WriteOnly => self.open_write(path).await.map(FileHandle::Write),
            OpenMode::ReadOnly => self.open_read(path).await.map(FileHandle::Read),
        }
    }

    /// Like `open_file`, taking raw `O_RDONLY`/`O_WRONLY` flags. Anything else is
    /// rejected before the name server is contacted.
    pub async fn open_file_with_flags(&self, path: &str, flags: i32) -> Result<FileHandle> {
        let mode = OpenMode::from_flags(flags)?;
        self.open_file(path, mode).await
    }

    /// Create (or truncate) `path` and return a handle writing its first block.
    pub async fn open_write(&self, path: &str) -> Result<WriteHandle> {
        let _timer = self.inner.timer("open", path);
        self.inner
            .nameserver
            .create_file(path, DEFAULT_FILE_MODE)
            .await?;
        debug!(path, "opened for write");
        Ok(WriteHandle::new(path, self.inner.clone()))
    }

    /// Resolve the block locations of `path` and return a handle reading them.
    pub async fn open_read(&self, path: &str) -> Result<ReadHandle> {
        let _timer = self.inner.timer("open", path);
        let located = self.inner.nameserver.get_file_location(path).await?;
        debug!(
            path,
            blocks = located.len(),
            file_length = located.file_length,
            "opened for read"
        );
        Ok(ReadHandle::new(path, self.inner.clone(), located))
    }

    pub async fn close(&self, handle: &FileHandle) -> Result<()> {
        handle.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallPolicy;
    use crate::error::ErrorKind;
    use crate::local::MemoryCluster;
    use crate::rpc::memory::MemoryTransport;
    use crate::rpc::proto::StatusCode;
    use std::time::Duration;

    #[tokio::test]
    async fn test_namespace_round_trip() {
        let cluster = MemoryCluster::new(2);
        let client = cluster.client(ClientConfig::default()).await.unwrap();

        client.create_directory("/d").await.unwrap();
        assert!(client.access("/d").await.unwrap());
        assert!(!client.access("/nope").await.unwrap());
        assert!(client.stat("/d").await.unwrap().is_dir());

        let w = client.open_write("/d/f").await.unwrap();
        w.write(b"hello").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(client.file_size("/d/f").await.unwrap(), 5);

        client.rename("/d/f", "/d/g").await.unwrap();
        let names: Vec<String> = client
            .list_directory("/d")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["g".to_string()]);

        let err = client.delete_directory("/d", false).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_EMPTY));
        client.delete_file("/d/g").await.unwrap();
        client.delete_directory("/d", false).await.unwrap();
        assert!(!client.access("/d").await.unwrap());
    }

    #[tokio::test]
    async fn test_status_and_connectivity_are_distinct() {
        let cluster = MemoryCluster::new(1);
        let client = cluster.client(ClientConfig::default()).await.unwrap();
        let err = client.stat("/missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status);
        assert!(!err.is_transient());

        let fast = ClientConfig::default().namespace(CallPolicy::new(Duration::from_millis(50), 2));
        let client = FileSystemClient::with_transport("ns:down", Arc::new(MemoryTransport::new()), fast)
            .await
            .unwrap();
        let err = client.create_directory("/d").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.is_transient());
        assert!(client.access("/d").await.is_err());
    }

    #[tokio::test]
    async fn test_bad_flags_fail_without_network() {
        let cluster = MemoryCluster::new(1);
        let client = cluster.client(ClientConfig::default()).await.unwrap();
        let before = cluster.transport.calls();
        let err = client
            .open_file_with_flags("/f", libc::O_RDWR)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.code(), -1);
        assert_eq!(cluster.transport.calls(), before);
    }

    #[tokio::test]
    async fn test_failed_open_yields_no_handle() {
        let cluster = MemoryCluster::new(1);
        let client = cluster.client(ClientConfig::default()).await.unwrap();
        client.create_directory("/d").await.unwrap();
        // a directory cannot be reopened as a file
        let err = client
            .open_file("/d", OpenMode::WriteOnly)
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), Some(StatusCode::ALREADY_EXISTS));
        let err = client
            .open_file("/d", OpenMode::ReadOnly)
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), Some(StatusCode::BAD_PARAMETER));
    }

    #[tokio::test]
    async fn test_rejects_bad_construction() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        assert!(
            FileSystemClient::with_transport("", transport.clone(), ClientConfig::default())
                .await
                .is_err()
        );
        assert!(
            FileSystemClient::with_transport(
                "ns",
                transport,
                ClientConfig::default().write_buffer_size(0)
            )
            .await
            .is_err()
        );
    }
}
