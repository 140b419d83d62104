//! Error types shared by the transport and the file system client.
//!
//! Failures fall into four kinds: the remote side could not be reached within the
//! call budget, the remote side answered with a nonzero status, the caller misused
//! a handle or passed a bad argument, or a read found no location metadata.

use crate::rpc::proto::StatusCode;
use crate::vfs::OpenMode;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Transport-level failure of a single remote call.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o with {addr} failed: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("call to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("connection to {addr} closed by peer")]
    Closed { addr: String },

    #[error("no service reachable at {addr}")]
    Unreachable { addr: String },

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("unexpected response from {addr}: {detail}")]
    UnexpectedResponse { addr: String, detail: String },
}

impl RpcError {
    /// Whether another attempt within the call budget may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Connect { .. }
                | RpcError::Io { .. }
                | RpcError::Timeout { .. }
                | RpcError::Closed { .. }
                | RpcError::Unreachable { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Name server or chunk server unreachable within the timeout/attempt budget.
    Connectivity,
    /// The remote call completed with a nonzero status code.
    Status,
    /// Wrong handle mode, closed handle or structurally invalid argument.
    Usage,
    /// Read attempted without a located block to read from.
    MissingMetadata,
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("{op} {target}: {source}")]
    Rpc {
        op: &'static str,
        target: String,
        #[source]
        source: RpcError,
    },

    #[error("{op} {target}: status {status}")]
    Status {
        op: &'static str,
        target: String,
        status: StatusCode,
    },

    #[error(
        "write block {block_id} at offset {offset} failed: status {status}, bad chunkserver {}",
        bad_chunkserver.as_deref().unwrap_or("unknown")
    )]
    ChunkWrite {
        block_id: i64,
        offset: i64,
        status: StatusCode,
        bad_chunkserver: Option<String>,
    },

    #[error("read block {block_id} failed: status {status}")]
    ChunkRead { block_id: i64, status: StatusCode },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation requires a {expected} handle")]
    WrongMode { expected: OpenMode },

    #[error("file handle is closed")]
    Closed,

    #[error("no located chunkserver for {path}")]
    NoLocation { path: String },

    /// A write sent its first `accepted` bytes before failing. The rest was not
    /// kept, so a retry should resend only `data[accepted..]`.
    #[error("write accepted {accepted} bytes before failing: {source}")]
    ShortWrite {
        accepted: usize,
        #[source]
        source: Box<FsError>,
    },
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::Rpc { .. } => ErrorKind::Connectivity,
            FsError::Status { .. } | FsError::ChunkWrite { .. } | FsError::ChunkRead { .. } => {
                ErrorKind::Status
            }
            FsError::InvalidArgument(_) | FsError::WrongMode { .. } | FsError::Closed => {
                ErrorKind::Usage
            }
            FsError::NoLocation { .. } => ErrorKind::MissingMetadata,
            FsError::ShortWrite { source, .. } => source.kind(),
        }
    }

    /// Connectivity failures may go away on their own; everything else will not.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }

    /// Application status carried by the error, if the remote side produced one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FsError::Status { status, .. }
            | FsError::ChunkWrite { status, .. }
            | FsError::ChunkRead { status, .. } => Some(*status),
            FsError::ShortWrite { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Negative sentinel used by callers that want the classic integer surface:
    /// -1 invalid argument (e.g. unsupported seek), -2 wrong mode, -3 no location
    /// metadata, -4 remote failure, -5 closed handle.
    pub fn code(&self) -> i64 {
        match self {
            FsError::InvalidArgument(_) => -1,
            FsError::WrongMode { .. } => -2,
            FsError::NoLocation { .. } => -3,
            FsError::Rpc { .. }
            | FsError::Status { .. }
            | FsError::ChunkWrite { .. }
            | FsError::ChunkRead { .. } => -4,
            FsError::Closed => -5,
            FsError::ShortWrite { source, .. } => source.code(),
        }
    }

    /// Bytes of the failed write that were sent before the failure.
    pub fn accepted(&self) -> usize {
        match self {
            FsError::ShortWrite { accepted, .. } => *accepted,
            _ => 0,
        }
    }
}
