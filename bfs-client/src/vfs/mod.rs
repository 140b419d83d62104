//! VFS layer: the client-facing file system API
//!
//! Responsibilities:
//! - Own the name server channel and the chunk server channel cache shared by all
//!   handles of one client.
//! - Implement namespace operations and open files in exactly one mode.
//! - Drive the block write protocol (allocate, stage, chain write, seal) and the
//!   single-block read path.
//!
//! Submodules:
//! - `client`: `FileSystemClient` and namespace operations
//! - `handles`: open modes and the `FileHandle` dispatcher
//! - `writer`: write handles and chunk transmission
//! - `reader`: read handles, cursor and positional reads

pub mod client;
pub mod handles;
pub mod reader;
pub mod writer;

pub use client::FileSystemClient;
pub use handles::{FileHandle, OpenMode};
pub use reader::ReadHandle;
pub use writer::WriteHandle;
