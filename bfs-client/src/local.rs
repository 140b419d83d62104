//! Single-process clusters built from the in-memory name server and chunk servers.
//!
//! `MemoryCluster` wires them through `MemoryTransport`; `LocalCluster` serves
//! them over TCP so the real transport and the CLI can be exercised end to end.

use crate::cadapter::InMemoryChunkServer;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::meta::InMemoryNameServer;
use crate::rpc::memory::MemoryTransport;
use crate::rpc::server::{serve, spawn_server};
use crate::rpc::tcp::TcpTransport;
use crate::vfs::FileSystemClient;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const MEMORY_NAMESERVER_ADDR: &str = "nameserver:8828";

pub struct MemoryCluster {
    pub transport: MemoryTransport,
    pub nameserver: Arc<InMemoryNameServer>,
    pub chunkservers: Vec<Arc<InMemoryChunkServer>>,
    chain: Vec<String>,
}

impl MemoryCluster {
    /// Name server plus `replicas` chunk servers forming every block's chain.
    pub fn new(replicas: usize) -> Self {
        let chain: Vec<String> = (0..replicas)
            .map(|i| format!("chunkserver-{i}:8825"))
            .collect();
        let transport = MemoryTransport::new();
        let nameserver = Arc::new(InMemoryNameServer::new(chain.clone()));
        transport.register(MEMORY_NAMESERVER_ADDR, nameserver.clone());
        let chunkservers = chain
            .iter()
            .map(|addr| {
                let cs = Arc::new(InMemoryChunkServer::new(addr.clone()).with_reporter(nameserver.clone()));
                transport.register(addr.clone(), cs.clone());
                cs
            })
            .collect();
        Self {
            transport,
            nameserver,
            chunkservers,
            chain,
        }
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// The chain head, which receives every client write.
    ///
    /// # Panics
    /// When the cluster was built without chunk servers.
    pub fn head(&self) -> &InMemoryChunkServer {
        &self.chunkservers[0]
    }

    pub async fn client(&self, config: ClientConfig) -> Result<FileSystemClient> {
        FileSystemClient::with_transport(
            MEMORY_NAMESERVER_ADDR,
            Arc::new(self.transport.clone()),
            config,
        )
        .await
    }
}

/// In-memory cluster served over loopback TCP. Servers stop when it is dropped.
pub struct LocalCluster {
    pub nameserver: Arc<InMemoryNameServer>,
    pub chunkservers: Vec<Arc<InMemoryChunkServer>>,
    nameserver_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Serve the name server on `nameserver_addr` and `replicas` chunk servers on
    /// ephemeral loopback ports.
    pub async fn start(nameserver_addr: &str, replicas: usize) -> io::Result<Self> {
        let mut listeners = Vec::with_capacity(replicas);
        for _ in 0..replicas {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?.to_string();
            listeners.push((addr, listener));
        }
        let chain: Vec<String> = listeners.iter().map(|(addr, _)| addr.clone()).collect();
        let nameserver = Arc::new(InMemoryNameServer::new(chain.clone()));

        let mut tasks = Vec::with_capacity(replicas + 1);
        let mut chunkservers = Vec::with_capacity(replicas);
        for (addr, listener) in listeners {
            let cs = Arc::new(InMemoryChunkServer::new(addr.clone()).with_reporter(nameserver.clone()));
            chunkservers.push(cs.clone());
            tasks.push(tokio::spawn(async move {
                if let Err(e) = serve(listener, cs).await {
                    warn!(%addr, "chunk server stopped: {e}");
                }
            }));
        }

        let (bound, task) = spawn_server(nameserver_addr, nameserver.clone()).await?;
        tasks.push(task);
        info!(nameserver = %bound, chain = ?chain, "local cluster started");
        Ok(Self {
            nameserver,
            chunkservers,
            nameserver_addr: bound,
            tasks,
        })
    }

    pub fn nameserver_addr(&self) -> SocketAddr {
        self.nameserver_addr
    }

    pub async fn client(&self, config: ClientConfig) -> Result<FileSystemClient> {
        FileSystemClient::with_transport(
            &self.nameserver_addr.to_string(),
            Arc::new(TcpTransport),
            config,
        )
        .await
    }

    /// Serve until the process is interrupted.
    pub async fn run_until_ctrl_c(self) -> io::Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("shutting down local cluster");
        Ok(())
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
