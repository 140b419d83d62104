// Library crate for the BFS client: file handles, namespace operations and the
// chained block write protocol, plus in-memory services used by tests and the CLI.

pub mod block;
pub mod cadapter;
pub mod config;
pub mod error;
pub mod local;
pub mod meta;
pub mod rpc;
pub mod util;
pub mod vfs;

pub use config::{CallPolicy, ClientConfig};
pub use error::{ErrorKind, FsError, Result, RpcError};
pub use rpc::proto::{FileInfo, StatusCode};
pub use vfs::{FileHandle, FileSystemClient, OpenMode, ReadHandle, WriteHandle};
