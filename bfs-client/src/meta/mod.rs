//! Name server client
//!
//! Responsibilities:
//! - Turn namespace and block-placement operations into name server requests.
//! - Map transport failures and nonzero status codes onto `FsError` so callers can
//!   tell an unreachable name server from a refused operation.
//!
//! Submodules:
//! - `memory`: in-memory name server used by tests and the local cluster

pub mod memory;

pub use memory::InMemoryNameServer;

use crate::block::{LocatedBlock, LocatedBlocks};
use crate::config::{CallPolicy, ClientConfig};
use crate::error::{FsError, Result, RpcError};
use crate::rpc::proto::{FileInfo, Message, StatusCode};
use crate::rpc::{Channel, RpcClient};
use std::sync::Arc;

pub struct NameServerClient {
    rpc: Arc<RpcClient>,
    channel: Arc<dyn Channel>,
    config: Arc<ClientConfig>,
}

impl NameServerClient {
    pub async fn new(rpc: Arc<RpcClient>, addr: &str, config: Arc<ClientConfig>) -> Self {
        let channel = rpc.get_stub(addr).await;
        Self {
            rpc,
            channel,
            config,
        }
    }

    pub fn address(&self) -> &str {
        self.channel.address()
    }

    async fn call(
        &self,
        op: &'static str,
        target: &str,
        request: Message,
        policy: CallPolicy,
    ) -> Result<Message> {
        self.rpc
            .send_request(self.channel.as_ref(), request, policy)
            .await
            .map_err(|source| FsError::Rpc {
                op,
                target: target.to_string(),
                source,
            })
    }

    fn unexpected(&self, op: &'static str, target: &str, response: &Message) -> FsError {
        let detail = match response {
            Message::Error(msg) => msg.clone(),
            other => format!("got {}", other.name()),
        };
        FsError::Rpc {
            op,
            target: target.to_string(),
            source: RpcError::UnexpectedResponse {
                addr: self.address().to_string(),
                detail,
            },
        }
    }

    fn check(op: &'static str, target: &str, status: StatusCode) -> Result<()> {
        if status.is_ok() {
            Ok(())
        } else {
            Err(FsError::Status {
                op,
                target: target.to_string(),
                status,
            })
        }
    }

    async fn status_call(
        &self,
        op: &'static str,
        target: &str,
        request: Message,
        policy: CallPolicy,
    ) -> Result<()> {
        match self.call(op, target, request, policy).await? {
            Message::Status(status) => Self::check(op, target, status),
            other => Err(self.unexpected(op, target, &other)),
        }
    }

    pub async fn create_file(&self, path: &str, mode: i32) -> Result<()> {
        let request = Message::CreateFile {
            path: path.to_string(),
            mode,
        };
        self.status_call("create file", path, request, self.config.namespace)
            .await
    }

    pub async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        let request = Message::ListDirectory {
            path: path.to_string(),
        };
        match self
            .call("list directory", path, request, self.config.namespace)
            .await?
        {
            Message::Listing { status, files } => {
                Self::check("list directory", path, status)?;
                Ok(files)
            }
            other => Err(self.unexpected("list directory", path, &other)),
        }
    }

    /// Raw stat response: `Ok(Err(status))` when the name server refused.
    pub async fn stat_status(&self, path: &str) -> Result<std::result::Result<FileInfo, StatusCode>> {
        let request = Message::Stat {
            path: path.to_string(),
        };
        match self.call("stat", path, request, self.config.namespace).await? {
            Message::FileStat {
                status,
                info: Some(info),
            } if status.is_ok() => Ok(Ok(info)),
            Message::FileStat { status, .. } if !status.is_ok() => Ok(Err(status)),
            other => Err(self.unexpected("stat", path, &other)),
        }
    }

    pub async fn stat(&self, path: &str) -> Result<FileInfo> {
        match self.stat_status(path).await? {
            Ok(info) => Ok(info),
            Err(status) => Err(FsError::Status {
                op: "stat",
                target: path.to_string(),
                status,
            }),
        }
    }

    pub async fn get_file_location(&self, path: &str) -> Result<LocatedBlocks> {
        let request = Message::GetFileLocation {
            path: path.to_string(),
        };
        match self
            .call("get file location", path, request, self.config.namespace)
            .await?
        {
            Message::Location {
                status,
                file_length,
                blocks,
            } => {
                Self::check("get file location", path, status)?;
                Ok(LocatedBlocks::new(file_length, blocks))
            }
            other => Err(self.unexpected("get file location", path, &other)),
        }
    }

    /// Allocate a new block at the end of `path` and its replica chain.
    pub async fn add_block(&self, path: &str) -> Result<LocatedBlock> {
        let request = Message::AddBlock {
            path: path.to_string(),
        };
        match self
            .call("add block", path, request, self.config.namespace)
            .await?
        {
            Message::AllocatedBlock {
                status,
                block: Some(block),
            } if status.is_ok() => Ok(block),
            Message::AllocatedBlock { status, .. } => Err(FsError::Status {
                op: "add block",
                target: path.to_string(),
                status: if status.is_ok() {
                    StatusCode::INTERNAL
                } else {
                    status
                },
            }),
            other => Err(self.unexpected("add block", path, &other)),
        }
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        let request = Message::Unlink {
            path: path.to_string(),
        };
        self.status_call("unlink", path, request, self.config.unlink)
            .await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let request = Message::Rename {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        };
        let target = format!("{old_path} -> {new_path}");
        self.status_call("rename", &target, request, self.config.namespace)
            .await
    }

    pub async fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let request = Message::DeleteDirectory {
            path: path.to_string(),
            recursive,
        };
        self.status_call("delete directory", path, request, self.config.namespace)
            .await
    }
}
