//! Open file and directory handles.
//!
//! Nodes are plain values owned by the connector that opened them. They
//! carry no storage logic; backends receive them so they can key their
//! work by path (or by descriptor, for stores that keep native handles).

use crate::descriptor::Fd;

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// The backend does not track kinds.
    #[default]
    Unknown,
}

impl EntryKind {
    /// The matching `d_type` value.
    pub fn d_type(self) -> u8 {
        match self {
            EntryKind::File => libc::DT_REG,
            EntryKind::Directory => libc::DT_DIR,
            EntryKind::Unknown => libc::DT_UNKNOWN,
        }
    }
}

/// One child of a directory, as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: EntryKind,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::Directory)
    }
}

/// `open(2)` flag word with the predicates the open decision needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub libc::c_int);

impl OpenFlags {
    pub fn bits(self) -> libc::c_int {
        self.0
    }

    pub fn create(self) -> bool {
        self.0 & libc::O_CREAT != 0
    }

    pub fn exclusive(self) -> bool {
        self.0 & libc::O_EXCL != 0
    }

    pub fn truncate(self) -> bool {
        self.0 & libc::O_TRUNC != 0
    }

    pub fn append(self) -> bool {
        self.0 & libc::O_APPEND != 0
    }

    pub fn readable(self) -> bool {
        matches!(self.0 & libc::O_ACCMODE, libc::O_RDONLY | libc::O_RDWR)
    }

    pub fn writable(self) -> bool {
        matches!(self.0 & libc::O_ACCMODE, libc::O_WRONLY | libc::O_RDWR)
    }
}

/// An open virtual file.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub fd: Fd,
    /// Canonical absolute path.
    pub path: String,
    pub flags: OpenFlags,
    /// Byte position for the next read or write.
    pub offset: u64,
}

impl FileNode {
    pub fn new(fd: Fd, path: impl Into<String>, flags: OpenFlags) -> Self {
        Self {
            fd,
            path: path.into(),
            flags,
            offset: 0,
        }
    }
}

/// One record produced by [`DirectoryNode::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    /// 1-based position in the snapshot; used as `d_ino`.
    pub ino: u64,
    pub name: String,
    pub kind: EntryKind,
}

/// An open virtual directory stream.
///
/// The listing is captured once when the stream is opened. Later changes to
/// the backend are not visible through this handle.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    pub fd: Fd,
    pub path: String,
    entries: Vec<DirEntry>,
    cursor: usize,
}

impl DirectoryNode {
    pub fn new(fd: Fd, path: impl Into<String>, entries: Vec<DirEntry>) -> Self {
        Self {
            fd,
            path: path.into(),
            entries,
            cursor: 0,
        }
    }

    /// Next entry, or `None` once the snapshot is exhausted.
    ///
    /// There is no rewind; reopen the directory to read it again.
    pub fn read(&mut self) -> Option<DirRecord> {
        let entry = self.entries.get(self.cursor)?;
        self.cursor += 1;
        Some(DirRecord {
            ino: self.cursor as u64,
            name: entry.name.clone(),
            kind: entry.kind,
        })
    }

    /// Entries left to read.
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor
    }
}
