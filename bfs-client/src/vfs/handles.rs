//! Open modes and the mode-dispatching file handle.

use super::reader::ReadHandle;
use super::writer::WriteHandle;
use crate::error::{FsError, Result};
use std::fmt;
use std::io::SeekFrom;

/// Access mode of an open file. There is no read-write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
}

impl OpenMode {
    /// Map raw `open(2)` flags. Only bare `O_RDONLY` and `O_WRONLY` are accepted.
    pub fn from_flags(flags: i32) -> Result<Self> {
        if flags == libc::O_RDONLY {
            Ok(OpenMode::ReadOnly)
        } else if flags == libc::O_WRONLY {
            Ok(OpenMode::WriteOnly)
        } else {
            Err(FsError::InvalidArgument(format!(
                "unsupported open flags {flags:#o}"
            )))
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::ReadOnly => f.write_str("read-only"),
            OpenMode::WriteOnly => f.write_str("write-only"),
        }
    }
}

/// An open file in either mode.
///
/// Calling an operation of the other mode fails with `FsError::WrongMode`, whether
/// or not the handle has been closed.
pub enum FileHandle {
    Read(ReadHandle),
    Write(WriteHandle),
}

impl FileHandle {
    pub fn mode(&self) -> OpenMode {
        match self {
            FileHandle::Read(_) => OpenMode::ReadOnly,
            FileHandle::Write(_) => OpenMode::WriteOnly,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileHandle::Read(h) => h.path(),
            FileHandle::Write(h) => h.path(),
        }
    }

    fn reader(&self) -> Result<&ReadHandle> {
        match self {
            FileHandle::Read(h) => Ok(h),
            FileHandle::Write(_) => Err(FsError::WrongMode {
                expected: OpenMode::ReadOnly,
            }),
        }
    }

    fn writer(&self) -> Result<&WriteHandle> {
        match self {
            FileHandle::Write(h) => Ok(h),
            FileHandle::Read(_) => Err(FsError::WrongMode {
                expected: OpenMode::WriteOnly,
            }),
        }
    }

    pub fn as_read(&self) -> Option<&ReadHandle> {
        self.reader().ok()
    }

    pub fn as_write(&self) -> Option<&WriteHandle> {
        self.writer().ok()
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.reader()?.read(buf).await
    }

    pub async fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.reader()?.pread(buf, offset).await
    }

    pub async fn seek(&self, pos: SeekFrom) -> Result<u64> {
        self.reader()?.seek(pos).await
    }

    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.writer()?.write(data).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.writer()?.flush().await
    }

    pub async fn sync(&self) -> Result<()> {
        self.writer()?.sync().await
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            FileHandle::Read(h) => h.close().await,
            FileHandle::Write(h) => h.close().await,
        }
    }
}

impl From<ReadHandle> for FileHandle {
    fn from(h: ReadHandle) -> Self {
        FileHandle::Read(h)
    }
}

impl From<WriteHandle> for FileHandle {
    fn from(h: WriteHandle) -> Self {
        FileHandle::Write(h)
    }
}
