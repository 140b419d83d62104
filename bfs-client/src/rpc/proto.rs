//! Wire messages exchanged with the name server and the chunk servers.

use crate::block::LocatedBlock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application-level result code carried next to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    pub const BAD_PARAMETER: StatusCode = StatusCode(401);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const ALREADY_EXISTS: StatusCode = StatusCode(409);
    pub const NOT_EMPTY: StatusCode = StatusCode(410);
    pub const INTERNAL: StatusCode = StatusCode(500);
    pub const WRITE_FAILED: StatusCode = StatusCode(507);

    pub fn is_ok(self) -> bool {
        self == StatusCode::OK
    }

    fn description(self) -> Option<&'static str> {
        Some(match self {
            StatusCode::OK => "ok",
            StatusCode::BAD_PARAMETER => "bad parameter",
            StatusCode::NOT_FOUND => "not found",
            StatusCode::ALREADY_EXISTS => "already exists",
            StatusCode::NOT_EMPTY => "directory not empty",
            StatusCode::INTERNAL => "internal error",
            StatusCode::WRITE_FAILED => "write failed",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(desc) => write!(f, "{} ({desc})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Type bit marking a directory in `FileInfo::mode`.
pub const DIR_TYPE_BIT: i32 = 1 << 9;
pub const DEFAULT_DIR_MODE: i32 = 0o755 | DIR_TYPE_BIT;
pub const DEFAULT_FILE_MODE: i32 = 0o644;

/// Directory entry returned by listing and stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: i64,
    /// Permission bits plus `DIR_TYPE_BIT` for directories.
    pub mode: i32,
    /// Creation time, seconds since the epoch.
    pub ctime: i64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.mode & DIR_TYPE_BIT != 0
    }

    pub fn permissions(&self) -> i32 {
        self.mode & 0o777
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBlockRequest {
    pub sequence_id: u64,
    pub block_id: i64,
    /// Byte offset inside the block where `data` starts.
    pub offset: i64,
    /// Seal the block after this chunk.
    pub is_last: bool,
    /// Chain members the receiver forwards to, in order.
    pub chunkservers: Vec<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // name server requests
    CreateFile { path: String, mode: i32 },
    ListDirectory { path: String },
    Stat { path: String },
    GetFileLocation { path: String },
    AddBlock { path: String },
    Unlink { path: String },
    Rename { old_path: String, new_path: String },
    DeleteDirectory { path: String, recursive: bool },
    BlockReceived { block_id: i64, block_size: i64 },

    // chunk server requests
    WriteBlock(Box<WriteBlockRequest>),
    ReadBlock { block_id: i64, offset: i64, read_len: i64 },

    // responses
    Status(StatusCode),
    Listing {
        status: StatusCode,
        files: Vec<FileInfo>,
    },
    FileStat {
        status: StatusCode,
        info: Option<FileInfo>,
    },
    Location {
        status: StatusCode,
        file_length: i64,
        blocks: Vec<LocatedBlock>,
    },
    AllocatedBlock {
        status: StatusCode,
        block: Option<LocatedBlock>,
    },
    WriteAck {
        status: StatusCode,
        bad_chunkserver: Option<String>,
    },
    BlockData {
        status: StatusCode,
        data: Vec<u8>,
    },
    /// Request the receiver does not understand or could not decode.
    Error(String),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::CreateFile { .. } => "CreateFile",
            Message::ListDirectory { .. } => "ListDirectory",
            Message::Stat { .. } => "Stat",
            Message::GetFileLocation { .. } => "GetFileLocation",
            Message::AddBlock { .. } => "AddBlock",
            Message::Unlink { .. } => "Unlink",
            Message::Rename { .. } => "Rename",
            Message::DeleteDirectory { .. } => "DeleteDirectory",
            Message::BlockReceived { .. } => "BlockReceived",
            Message::WriteBlock(_) => "WriteBlock",
            Message::ReadBlock { .. } => "ReadBlock",
            Message::Status(_) => "Status",
            Message::Listing { .. } => "Listing",
            Message::FileStat { .. } => "FileStat",
            Message::Location { .. } => "Location",
            Message::AllocatedBlock { .. } => "AllocatedBlock",
            Message::WriteAck { .. } => "WriteAck",
            Message::BlockData { .. } => "BlockData",
            Message::Error(_) => "Error",
        }
    }
}
