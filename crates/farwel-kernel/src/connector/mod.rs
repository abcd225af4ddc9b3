//! Connectors: named backends with descriptor bookkeeping.
//!
//! A [`Backend`] implements storage. A [`Connector`] wraps one backend,
//! owns every node opened through it, and turns descriptor-addressed calls
//! into path-addressed backend calls.
//!
//! Each connector keeps two indices behind one lock:
//!
//! - descriptor -> node (files and directories separately)
//! - path -> set of descriptors currently open on that path
//!
//! Nodes themselves sit behind their own mutex so backend I/O on one
//! descriptor does not hold up opens and closes of others.

mod dummy;
mod factory;
mod memory;
mod passthrough;
mod sqldb;

pub use dummy::DummyBackend;
pub use factory::{ConnectorFactory, ConnectorRegistry, FactoryContext};
pub use memory::MemoryBackend;
pub use passthrough::PassthroughBackend;
pub use sqldb::{SqlBackend, SqlConfig};

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::Dispatch;

use crate::descriptor::{ConnectorId, DescriptorAllocator, Fd};
use crate::error::{FarwelError, FarwelResult};
use crate::node::{DirEntry, DirRecord, DirectoryNode, FileNode, OpenFlags};
use crate::path;
use crate::stat::SyntheticStat;

/// Block size reported when a backend has no natural one.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

/// Storage operations a connector delegates to.
///
/// All paths are canonical and absolute. Mutations that a store cannot
/// express keep the default `Unsupported` body.
pub trait Backend: Send + Sync {
    /// Existence probe used by the open decision.
    fn exists(&self, path: &str) -> FarwelResult<bool>;

    /// Create an empty entry.
    fn create(&self, path: &str, mode: u32) -> FarwelResult<()>;

    /// Reset an existing entry to zero length.
    fn truncate(&self, path: &str) -> FarwelResult<()>;

    /// Called once a file node has passed the open decision.
    fn open_file(&self, _file: &FileNode) -> FarwelResult<()> {
        Ok(())
    }

    /// Read into `buf` at `file.offset`. Returns 0 at end of data.
    fn read(&self, file: &FileNode, buf: &mut [u8]) -> FarwelResult<usize>;

    /// Write `data` at `file.offset`. Returns the number of bytes accepted.
    fn write(&self, file: &FileNode, data: &[u8]) -> FarwelResult<usize>;

    /// Called before a file node is dropped.
    fn close_file(&self, _file: &FileNode) -> FarwelResult<()> {
        Ok(())
    }

    /// Children of `path`, captured once per `opendir`.
    fn list_dir(&self, path: &str) -> FarwelResult<Vec<DirEntry>>;

    /// Called before a directory node is dropped.
    fn close_dir(&self, _dir: &DirectoryNode) -> FarwelResult<()> {
        Ok(())
    }

    fn unlink(&self, _path: &str) -> FarwelResult<()> {
        Err(FarwelError::Unsupported("unlink"))
    }

    fn rename(&self, _from: &str, _to: &str) -> FarwelResult<()> {
        Err(FarwelError::Unsupported("rename"))
    }

    fn mkdir(&self, _path: &str, _mode: u32) -> FarwelResult<()> {
        Err(FarwelError::Unsupported("mkdir"))
    }

    fn rmdir(&self, _path: &str) -> FarwelResult<()> {
        Err(FarwelError::Unsupported("rmdir"))
    }

    /// Length of the entry at `path` in bytes.
    fn file_size(&self, path: &str) -> FarwelResult<u64>;

    fn block_size(&self) -> u64 {
        DEFAULT_BLOCK_SIZE
    }
}

type SharedFile = Arc<Mutex<FileNode>>;
type SharedDir = Arc<Mutex<DirectoryNode>>;

#[derive(Debug, Default)]
struct NodeIndex {
    files: HashMap<Fd, SharedFile>,
    dirs: HashMap<Fd, SharedDir>,
    paths: HashMap<String, BTreeSet<Fd>>,
}

impl NodeIndex {
    fn link(&mut self, path: &str, fd: Fd) {
        self.paths.entry(path.to_string()).or_default().insert(fd);
    }

    fn unlink(&mut self, path: &str, fd: Fd) {
        if let Some(fds) = self.paths.get_mut(path) {
            fds.remove(&fd);
            if fds.is_empty() {
                self.paths.remove(path);
            }
        }
    }
}

/// A named backend instance reachable from the routing table.
pub struct Connector {
    name: String,
    id: ConnectorId,
    allocator: Arc<DescriptorAllocator>,
    backend: Box<dyn Backend>,
    nodes: Mutex<NodeIndex>,
    /// Subscriber from the connector's own `log` node, if it has one.
    logger: Option<Dispatch>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("nodes", &"<locked>")
            .field("own_logger", &self.logger.is_some())
            .finish()
    }
}

impl Connector {
    pub fn new(
        name: impl Into<String>,
        id: ConnectorId,
        allocator: Arc<DescriptorAllocator>,
        backend: Box<dyn Backend>,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            allocator,
            backend,
            nodes: Mutex::new(NodeIndex::default()),
            logger: None,
        }
    }

    /// Send this connector's events to `logger` instead of the global
    /// subscriber.
    pub fn set_logger(&mut self, logger: Dispatch) {
        self.logger = Some(logger);
    }

    fn traced(&self, event: impl FnOnce()) {
        match &self.logger {
            Some(logger) => tracing::dispatcher::with_default(logger, event),
            None => event(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ConnectorId {
        self.id
    }

    /// Log a failed backend call. Faults go out at `error`, ordinary POSIX
    /// outcomes at `debug`.
    fn report<T>(&self, op: &'static str, path: &str, result: FarwelResult<T>) -> FarwelResult<T> {
        if let Err(e) = &result {
            self.traced(|| {
                let connector = self.name.as_str();
                if e.is_fault() {
                    tracing::error!(connector, op, path, error = %e, "backend failure");
                } else {
                    tracing::debug!(connector, op, path, error = %e, "operation failed");
                }
            });
        }
        result
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Open `path` and return a new descriptor.
    ///
    /// | O_CREAT | exists | O_EXCL | O_TRUNC | outcome               |
    /// |---------|--------|--------|---------|-----------------------|
    /// | no      | no     |        |         | NotFound              |
    /// | yes     | no     |        |         | create, else AccessDenied |
    /// | yes     | yes    | yes    |         | AlreadyExists         |
    /// | yes     | yes    | no     | yes     | truncate, else AccessDenied |
    /// | yes     | yes    | no     | no      | open as is            |
    /// | no      | yes    |        |         | open as is            |
    ///
    /// The descriptor is released again on every failure path.
    pub fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> FarwelResult<Fd> {
        let fd = self.allocator.allocate(self.id)?;

        let opened = self.prepare(path, flags, mode).and_then(|()| {
            let node = FileNode::new(fd, path, flags);
            self.report("open", path, self.backend.open_file(&node))?;
            Ok(node)
        });

        match opened {
            Ok(node) => {
                let mut nodes = self.nodes.lock();
                nodes.link(path, fd);
                nodes.files.insert(fd, Arc::new(Mutex::new(node)));
                self.traced(|| {
                    let connector = self.name.as_str();
                    tracing::debug!(connector, path, fd, flags = flags.bits(), "opened")
                });
                Ok(fd)
            }
            Err(e) => {
                self.allocator.release(fd, self.id);
                Err(e)
            }
        }
    }

    fn prepare(&self, path: &str, flags: OpenFlags, mode: u32) -> FarwelResult<()> {
        let exists = self.report("exists", path, self.backend.exists(path))?;
        match (flags.create(), exists) {
            (false, false) => Err(FarwelError::not_found(path)),
            (true, false) => self
                .report("create", path, self.backend.create(path, mode))
                .map_err(|_| FarwelError::access_denied(path)),
            (true, true) if flags.exclusive() => Err(FarwelError::already_exists(path)),
            (true, true) if flags.truncate() => self
                .report("truncate", path, self.backend.truncate(path))
                .map_err(|_| FarwelError::access_denied(path)),
            _ => Ok(()),
        }
    }

    fn file(&self, fd: Fd) -> FarwelResult<SharedFile> {
        let nodes = self.nodes.lock();
        if let Some(file) = nodes.files.get(&fd) {
            return Ok(Arc::clone(file));
        }
        match nodes.dirs.get(&fd) {
            Some(dir) => Err(FarwelError::is_a_directory(dir.lock().path.clone())),
            None => Err(FarwelError::BadDescriptor(fd)),
        }
    }

    /// Read from the current offset of `fd` and advance it.
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> FarwelResult<usize> {
        let file = self.file(fd)?;
        let mut node = file.lock();
        if !node.flags.readable() {
            return Err(FarwelError::BadDescriptor(fd));
        }
        let n = self.report("read", &node.path, self.backend.read(&node, buf))?;
        node.offset += n as u64;
        Ok(n)
    }

    /// Write at the current offset of `fd` (or at the end for `O_APPEND`)
    /// and advance it.
    pub fn write(&self, fd: Fd, data: &[u8]) -> FarwelResult<usize> {
        let file = self.file(fd)?;
        let mut node = file.lock();
        if !node.flags.writable() {
            return Err(FarwelError::BadDescriptor(fd));
        }
        if node.flags.append() {
            node.offset = self.report("size", &node.path, self.backend.file_size(&node.path))?;
        }
        let n = self.report("write", &node.path, self.backend.write(&node, data))?;
        node.offset += n as u64;
        Ok(n)
    }

    /// Close a file or directory descriptor.
    ///
    /// The node leaves both indices and the descriptor is released even if
    /// the backend's finalization fails. A second close reports
    /// `BadDescriptor`.
    pub fn close(&self, fd: Fd) -> FarwelResult<()> {
        let (file, dir) = {
            let mut nodes = self.nodes.lock();
            let file = nodes.files.remove(&fd);
            let dir = if file.is_none() { nodes.dirs.remove(&fd) } else { None };
            let path = file
                .as_ref()
                .map(|f| f.lock().path.clone())
                .or_else(|| dir.as_ref().map(|d| d.lock().path.clone()));
            match path {
                Some(path) => nodes.unlink(&path, fd),
                None => return Err(FarwelError::BadDescriptor(fd)),
            }
            (file, dir)
        };

        let result = match (file, dir) {
            (Some(file), _) => {
                let node = file.lock();
                self.report("close", &node.path, self.backend.close_file(&node))
            }
            (None, Some(dir)) => {
                let node = dir.lock();
                self.report("closedir", &node.path, self.backend.close_dir(&node))
            }
            (None, None) => Ok(()),
        };
        self.allocator.release(fd, self.id);
        self.traced(|| tracing::debug!(connector = %self.name, fd, "closed"));
        result
    }

    // ========================================================================
    // Directories
    // ========================================================================

    /// Open a directory stream over a snapshot of `path`'s children.
    pub fn open_dir(&self, path: &str) -> FarwelResult<Fd> {
        let fd = self.allocator.allocate(self.id)?;
        match self.report("opendir", path, self.backend.list_dir(path)) {
            Ok(entries) => {
                let node = DirectoryNode::new(fd, path, entries);
                let mut nodes = self.nodes.lock();
                nodes.link(path, fd);
                nodes.dirs.insert(fd, Arc::new(Mutex::new(node)));
                self.traced(|| {
                    tracing::debug!(connector = %self.name, path, fd, "opened directory")
                });
                Ok(fd)
            }
            Err(e) => {
                self.allocator.release(fd, self.id);
                Err(e)
            }
        }
    }

    /// Next record of the stream, `None` at the end.
    pub fn read_dir(&self, fd: Fd) -> FarwelResult<Option<DirRecord>> {
        let dir = self
            .nodes
            .lock()
            .dirs
            .get(&fd)
            .cloned()
            .ok_or(FarwelError::BadDescriptor(fd))?;
        let record = dir.lock().read();
        Ok(record)
    }

    /// Close a directory stream.
    pub fn close_dir(&self, fd: Fd) -> FarwelResult<()> {
        if !self.nodes.lock().dirs.contains_key(&fd) {
            return Err(FarwelError::BadDescriptor(fd));
        }
        self.close(fd)
    }

    // ========================================================================
    // Path mutations
    // ========================================================================

    pub fn unlink(&self, path: &str) -> FarwelResult<()> {
        self.report("unlink", path, self.backend.unlink(path))
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FarwelResult<()> {
        self.report("mkdir", path, self.backend.mkdir(path, mode))
    }

    pub fn rmdir(&self, path: &str) -> FarwelResult<()> {
        self.report("rmdir", path, self.backend.rmdir(path))
    }

    /// Rename within this connector. Open nodes on `from` (or below it)
    /// follow the entry to its new path.
    pub fn rename(&self, from: &str, to: &str) -> FarwelResult<()> {
        self.report("rename", from, self.backend.rename(from, to))?;

        let mut nodes = self.nodes.lock();
        let moved: Vec<String> = nodes
            .paths
            .keys()
            .filter(|p| p.as_str() == from || path::is_descendant(p, from))
            .cloned()
            .collect();
        for old in moved {
            let new = path::rebase(&old, from, to);
            let Some(fds) = nodes.paths.remove(&old) else {
                continue;
            };
            for fd in &fds {
                if let Some(file) = nodes.files.get(fd) {
                    file.lock().path = new.clone();
                } else if let Some(dir) = nodes.dirs.get(fd) {
                    dir.lock().path = new.clone();
                }
            }
            nodes.paths.entry(new).or_default().extend(fds);
        }
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn file_size(&self, path: &str) -> FarwelResult<u64> {
        self.report("size", path, self.backend.file_size(path))
    }

    /// Size of the entry an open descriptor refers to.
    pub fn file_size_of(&self, fd: Fd) -> FarwelResult<u64> {
        let path = self.path_of(fd).ok_or(FarwelError::BadDescriptor(fd))?;
        self.file_size(&path)
    }

    pub fn block_size(&self) -> u64 {
        self.backend.block_size()
    }

    /// Synthetic record for `path`. Any size failure reads as NotFound.
    pub fn stat(&self, path: &str) -> FarwelResult<SyntheticStat> {
        let size = self
            .file_size(path)
            .map_err(|_| FarwelError::not_found(path))?;
        Ok(SyntheticStat::new(size, self.block_size()))
    }

    /// Synthetic record for an open descriptor.
    pub fn fstat(&self, fd: Fd) -> FarwelResult<SyntheticStat> {
        let path = self.path_of(fd).ok_or(FarwelError::BadDescriptor(fd))?;
        self.stat(&path)
    }

    /// `fcntl` on a virtual descriptor. `F_GETFL` reports the open flags.
    /// The duplicating commands fail with `EINVAL`, since a duplicate would
    /// need a descriptor from the host's space. Everything else is a no-op.
    pub fn fcntl(&self, fd: Fd, cmd: libc::c_int) -> FarwelResult<libc::c_int> {
        let nodes = self.nodes.lock();
        let flags = if let Some(file) = nodes.files.get(&fd) {
            file.lock().flags.bits()
        } else if nodes.dirs.contains_key(&fd) {
            libc::O_RDONLY | libc::O_DIRECTORY
        } else {
            return Err(FarwelError::BadDescriptor(fd));
        };
        match cmd {
            libc::F_GETFL => Ok(flags),
            libc::F_DUPFD | libc::F_DUPFD_CLOEXEC => Err(FarwelError::InvalidArgument("F_DUPFD")),
            _ => Ok(0),
        }
    }

    // ========================================================================
    // Index queries
    // ========================================================================

    /// Path an open descriptor refers to.
    pub fn path_of(&self, fd: Fd) -> Option<String> {
        let nodes = self.nodes.lock();
        if let Some(file) = nodes.files.get(&fd) {
            return Some(file.lock().path.clone());
        }
        nodes.dirs.get(&fd).map(|d| d.lock().path.clone())
    }

    /// Descriptors currently open on `path`, in issue order.
    pub fn open_descriptors(&self, path: &str) -> Vec<Fd> {
        self.nodes
            .lock()
            .paths
            .get(path)
            .map(|fds| fds.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_directory_stream(&self, fd: Fd) -> bool {
        self.nodes.lock().dirs.contains_key(&fd)
    }

    /// Number of open nodes.
    pub fn open_count(&self) -> usize {
        let nodes = self.nodes.lock();
        nodes.files.len() + nodes.dirs.len()
    }
}
