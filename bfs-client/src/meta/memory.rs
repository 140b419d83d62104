//! In-memory name server: a path-keyed namespace plus block placement.
//!
//! Parents are created implicitly by `CreateFile`. Every allocated block is placed on
//! the configured replica chain. Locating a path that does not exist answers OK with
//! no blocks, the same as an empty file.

use crate::block::LocatedBlock;
use crate::rpc::Service;
use crate::rpc::proto::{DIR_TYPE_BIT, DEFAULT_DIR_MODE, FileInfo, Message, StatusCode};
use crate::util::{norm_path, split_dir_file};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq, Eq)]
enum NodeKind {
    Dir,
    File { blocks: Vec<i64> },
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    mode: i32,
    ctime: i64,
}

impl Node {
    fn dir(mode: i32) -> Self {
        Self {
            kind: NodeKind::Dir,
            mode: mode | DIR_TYPE_BIT,
            ctime: now_secs(),
        }
    }

    fn file(mode: i32) -> Self {
        Self {
            kind: NodeKind::File { blocks: Vec::new() },
            mode: mode & !DIR_TYPE_BIT,
            ctime: now_secs(),
        }
    }

    fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }
}

struct Namespace {
    nodes: BTreeMap<String, Node>,
    blocks: HashMap<i64, LocatedBlock>,
    next_block_id: i64,
}

pub struct InMemoryNameServer {
    chain: Vec<String>,
    ns: Mutex<Namespace>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

impl InMemoryNameServer {
    /// New namespace holding only `/`; new blocks go to `chain`, head first.
    pub fn new(chain: Vec<String>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::dir(DEFAULT_DIR_MODE));
        Self {
            chain,
            ns: Mutex::new(Namespace {
                nodes,
                blocks: HashMap::new(),
                next_block_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Namespace> {
        self.ns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chunk server report: `block_id` now holds `block_size` bytes.
    pub fn block_received(&self, block_id: i64, block_size: i64) -> StatusCode {
        match self.lock().blocks.get_mut(&block_id) {
            Some(block) => {
                block.block_size = block_size;
                StatusCode::OK
            }
            None => StatusCode::NOT_FOUND,
        }
    }

    /// Block ids of the file at `path`, in file order.
    pub fn file_blocks(&self, path: &str) -> Option<Vec<i64>> {
        match &self.lock().nodes.get(&norm_path(path))?.kind {
            NodeKind::File { blocks } => Some(blocks.clone()),
            NodeKind::Dir => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(&norm_path(path))
    }

    fn create_file(&self, path: &str, mode: i32) -> StatusCode {
        let path = norm_path(path);
        if path == "/" {
            return StatusCode::ALREADY_EXISTS;
        }
        let want_dir = mode & DIR_TYPE_BIT != 0;
        let mut ns = self.lock();
        if let Some(existing) = ns.nodes.get(&path) {
            if want_dir || existing.is_dir() {
                return StatusCode::ALREADY_EXISTS;
            }
            // reopening a file for write starts it over
            let old_blocks = match &existing.kind {
                NodeKind::File { blocks } => blocks.clone(),
                NodeKind::Dir => Vec::new(),
            };
            for id in old_blocks {
                ns.blocks.remove(&id);
            }
            ns.nodes.insert(path, Node::file(mode));
            return StatusCode::OK;
        }

        // mkdir -p the parents
        let (dir, _) = split_dir_file(&path);
        let mut cur = String::new();
        for part in dir.split('/').filter(|s| !s.is_empty()) {
            cur.push('/');
            cur.push_str(part);
            match ns.nodes.get(&cur) {
                Some(node) if !node.is_dir() => return StatusCode::BAD_PARAMETER,
                Some(_) => {}
                None => {
                    ns.nodes.insert(cur.clone(), Node::dir(DEFAULT_DIR_MODE));
                }
            }
        }
        let node = if want_dir {
            Node::dir(mode)
        } else {
            Node::file(mode)
        };
        ns.nodes.insert(path, node);
        StatusCode::OK
    }

    fn info_for(ns: &Namespace, path: &str, node: &Node) -> FileInfo {
        let size = match &node.kind {
            NodeKind::File { blocks } => blocks
                .iter()
                .filter_map(|id| ns.blocks.get(id))
                .map(|b| b.block_size)
                .sum(),
            NodeKind::Dir => 0,
        };
        let name = if path == "/" {
            "/".to_string()
        } else {
            split_dir_file(path).1
        };
        FileInfo {
            name,
            size,
            mode: node.mode,
            ctime: node.ctime,
        }
    }

    fn list_directory(&self, path: &str) -> Message {
        let path = norm_path(path);
        let ns = self.lock();
        match ns.nodes.get(&path) {
            Some(node) if node.is_dir() => {}
            Some(_) => {
                return Message::Listing {
                    status: StatusCode::BAD_PARAMETER,
                    files: Vec::new(),
                };
            }
            None => {
                return Message::Listing {
                    status: StatusCode::NOT_FOUND,
                    files: Vec::new(),
                };
            }
        }
        let files = ns
            .nodes
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && split_dir_file(p).0 == path)
            .map(|(p, node)| Self::info_for(&ns, p, node))
            .collect();
        Message::Listing {
            status: StatusCode::OK,
            files,
        }
    }

    fn stat(&self, path: &str) -> Message {
        let path = norm_path(path);
        let ns = self.lock();
        match ns.nodes.get(&path) {
            Some(node) => Message::FileStat {
                status: StatusCode::OK,
                info: Some(Self::info_for(&ns, &path, node)),
            },
            None => Message::FileStat {
                status: StatusCode::NOT_FOUND,
                info: None,
            },
        }
    }

    fn get_file_location(&self, path: &str) -> Message {
        let path = norm_path(path);
        let ns = self.lock();
        let ids = match ns.nodes.get(&path).map(|n| &n.kind) {
            Some(NodeKind::File { blocks }) => blocks.clone(),
            Some(NodeKind::Dir) => {
                return Message::Location {
                    status: StatusCode::BAD_PARAMETER,
                    file_length: 0,
                    blocks: Vec::new(),
                };
            }
            None => Vec::new(),
        };
        let blocks: Vec<LocatedBlock> = ids
            .iter()
            .filter_map(|id| ns.blocks.get(id).cloned())
            .collect();
        Message::Location {
            status: StatusCode::OK,
            file_length: blocks.iter().map(|b| b.block_size).sum(),
            blocks,
        }
    }

    fn add_block(&self, path: &str) -> Message {
        let path = norm_path(path);
        let mut guard = self.lock();
        let ns = &mut *guard;
        let blocks = match ns.nodes.get_mut(&path).map(|n| &mut n.kind) {
            Some(NodeKind::File { blocks }) => blocks,
            Some(NodeKind::Dir) => {
                return Message::AllocatedBlock {
                    status: StatusCode::BAD_PARAMETER,
                    block: None,
                };
            }
            None => {
                return Message::AllocatedBlock {
                    status: StatusCode::NOT_FOUND,
                    block: None,
                };
            }
        };
        let id = ns.next_block_id;
        ns.next_block_id += 1;
        blocks.push(id);
        let block = LocatedBlock::new(id, self.chain.clone());
        ns.blocks.insert(id, block.clone());
        Message::AllocatedBlock {
            status: StatusCode::OK,
            block: Some(block),
        }
    }

    fn unlink(&self, path: &str) -> StatusCode {
        let path = norm_path(path);
        let mut ns = self.lock();
        let blocks = match ns.nodes.get(&path).map(|n| &n.kind) {
            Some(NodeKind::File { blocks }) => blocks.clone(),
            Some(NodeKind::Dir) => return StatusCode::BAD_PARAMETER,
            None => return StatusCode::NOT_FOUND,
        };
        for id in blocks {
            ns.blocks.remove(&id);
        }
        ns.nodes.remove(&path);
        StatusCode::OK
    }

    fn rename(&self, old_path: &str, new_path: &str) -> StatusCode {
        let old = norm_path(old_path);
        let new = norm_path(new_path);
        if old == "/" || new == "/" || is_descendant(&new, &old) {
            return StatusCode::BAD_PARAMETER;
        }
        let mut ns = self.lock();
        if !ns.nodes.contains_key(&old) {
            return StatusCode::NOT_FOUND;
        }
        if ns.nodes.contains_key(&new) {
            return StatusCode::ALREADY_EXISTS;
        }
        let (new_dir, _) = split_dir_file(&new);
        match ns.nodes.get(&new_dir) {
            Some(node) if node.is_dir() => {}
            Some(_) => return StatusCode::BAD_PARAMETER,
            None => return StatusCode::NOT_FOUND,
        }
        let moved: Vec<String> = ns
            .nodes
            .keys()
            .filter(|p| **p == old || is_descendant(p, &old))
            .cloned()
            .collect();
        for p in moved {
            if let Some(node) = ns.nodes.remove(&p) {
                let renamed = format!("{new}{}", &p[old.len()..]);
                ns.nodes.insert(renamed, node);
            }
        }
        StatusCode::OK
    }

    fn delete_directory(&self, path: &str, recursive: bool) -> StatusCode {
        let path = norm_path(path);
        if path == "/" {
            return StatusCode::BAD_PARAMETER;
        }
        let mut ns = self.lock();
        match ns.nodes.get(&path) {
            Some(node) if node.is_dir() => {}
            Some(_) => return StatusCode::BAD_PARAMETER,
            None => return StatusCode::NOT_FOUND,
        }
        let children: Vec<String> = ns
            .nodes
            .keys()
            .filter(|p| is_descendant(p, &path))
            .cloned()
            .collect();
        if !children.is_empty() && !recursive {
            return StatusCode::NOT_EMPTY;
        }
        for p in children {
            if let Some(Node {
                kind: NodeKind::File { blocks },
                ..
            }) = ns.nodes.remove(&p)
            {
                for id in blocks {
                    ns.blocks.remove(&id);
                }
            }
        }
        ns.nodes.remove(&path);
        StatusCode::OK
    }
}

#[async_trait]
impl Service for InMemoryNameServer {
    async fn handle(&self, request: Message) -> Message {
        match request {
            Message::CreateFile { path, mode } => Message::Status(self.create_file(&path, mode)),
            Message::ListDirectory { path } => self.list_directory(&path),
            Message::Stat { path } => self.stat(&path),
            Message::GetFileLocation { path } => self.get_file_location(&path),
            Message::AddBlock { path } => self.add_block(&path),
            Message::Unlink { path } => Message::Status(self.unlink(&path)),
            Message::Rename { old_path, new_path } => {
                Message::Status(self.rename(&old_path, &new_path))
            }
            Message::DeleteDirectory { path, recursive } => {
                Message::Status(self.delete_directory(&path, recursive))
            }
            Message::BlockReceived {
                block_id,
                block_size,
            } => Message::Status(self.block_received(block_id, block_size)),
            other => Message::Error(format!("name server cannot handle {}", other.name())),
        }
    }
}
