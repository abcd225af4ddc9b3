//! Backend that forwards to the real filesystem.
//!
//! Each virtual descriptor is backed by a real one, opened through the
//! [`RealOs`] so the calls bypass interception. An optional `root` re-roots
//! every virtual path under a host directory.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::io;
use std::sync::Arc;

use super::Backend;
use crate::descriptor::Fd;
use crate::error::{FarwelError, FarwelResult};
use crate::node::{DirEntry, EntryKind, FileNode};
use crate::real::RealOs;

pub struct PassthroughBackend {
    real: Arc<dyn RealOs>,
    root: Option<String>,
    /// Virtual descriptor -> real descriptor.
    handles: Mutex<HashMap<Fd, libc::c_int>>,
}

impl std::fmt::Debug for PassthroughBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughBackend")
            .field("root", &self.root)
            .field("handles", &self.handles.lock().len())
            .finish()
    }
}

/// Turn a `-1`-style return into an error carrying `errno`.
fn check<T: PartialOrd + Default>(ret: T) -> FarwelResult<T> {
    if ret < T::default() {
        Err(FarwelError::Io(io::Error::last_os_error()))
    } else {
        Ok(ret)
    }
}

impl PassthroughBackend {
    pub fn new(real: Arc<dyn RealOs>, root: Option<String>) -> Self {
        Self {
            real,
            root: root.map(|r| r.trim_end_matches('/').to_string()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn host_path(&self, path: &str) -> FarwelResult<CString> {
        let full = match &self.root {
            Some(root) => format!("{root}{path}"),
            None => path.to_string(),
        };
        CString::new(full).map_err(|_| FarwelError::invalid_path(path))
    }

    fn stat(&self, path: &str) -> FarwelResult<libc::stat> {
        let host = self.host_path(path)?;
        // SAFETY: libc::stat is plain old data.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        check(self.real.stat(&host, &mut st))?;
        Ok(st)
    }

    /// Open and immediately close, for create and truncate.
    fn touch(&self, path: &str, flags: libc::c_int, mode: u32) -> FarwelResult<()> {
        let host = self.host_path(path)?;
        let fd = check(self.real.open(&host, flags, mode as libc::mode_t))?;
        check(self.real.close(fd))?;
        Ok(())
    }

    fn handle(&self, fd: Fd) -> FarwelResult<libc::c_int> {
        self.handles
            .lock()
            .get(&fd)
            .copied()
            .ok_or(FarwelError::BadDescriptor(fd))
    }
}

impl Backend for PassthroughBackend {
    fn exists(&self, path: &str) -> FarwelResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(FarwelError::Io(e)) if e.raw_os_error() == Some(libc::ENOENT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&self, path: &str, mode: u32) -> FarwelResult<()> {
        self.touch(path, libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY, mode)
    }

    fn truncate(&self, path: &str) -> FarwelResult<()> {
        self.touch(path, libc::O_WRONLY | libc::O_TRUNC, 0)
    }

    fn open_file(&self, file: &FileNode) -> FarwelResult<()> {
        let host = self.host_path(&file.path)?;
        // Creation and truncation were settled by the open decision.
        let flags = file.flags.bits() & !(libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC);
        let real_fd = check(self.real.open(&host, flags, 0))?;
        self.handles.lock().insert(file.fd, real_fd);
        Ok(())
    }

    fn read(&self, file: &FileNode, buf: &mut [u8]) -> FarwelResult<usize> {
        let fd = self.handle(file.fd)?;
        Ok(check(self.real.read(fd, buf))? as usize)
    }

    fn write(&self, file: &FileNode, data: &[u8]) -> FarwelResult<usize> {
        let fd = self.handle(file.fd)?;
        Ok(check(self.real.write(fd, data))? as usize)
    }

    fn close_file(&self, file: &FileNode) -> FarwelResult<()> {
        let fd = self
            .handles
            .lock()
            .remove(&file.fd)
            .ok_or(FarwelError::BadDescriptor(file.fd))?;
        check(self.real.close(fd))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> FarwelResult<Vec<DirEntry>> {
        let host = self.host_path(path)?;
        let dir = self.real.opendir(&host);
        if dir.is_null() {
            return Err(FarwelError::Io(io::Error::last_os_error()));
        }

        let mut entries = Vec::new();
        loop {
            // SAFETY: `dir` is the live stream opened above.
            let ent = unsafe { self.real.readdir(dir) };
            if ent.is_null() {
                break;
            }
            // SAFETY: readdir returned a valid dirent whose d_name is
            // NUL-terminated; it stays valid until the next readdir.
            let (name, d_type) = unsafe {
                let ent = &*ent;
                (CStr::from_ptr(ent.d_name.as_ptr()), ent.d_type)
            };
            let name = name.to_string_lossy();
            if name == "." || name == ".." {
                continue;
            }
            let kind = match d_type {
                libc::DT_REG => EntryKind::File,
                libc::DT_DIR => EntryKind::Directory,
                _ => EntryKind::Unknown,
            };
            entries.push(DirEntry::new(name, kind));
        }

        // SAFETY: `dir` is live and not used after this call.
        check(unsafe { self.real.closedir(dir) })?;
        Ok(entries)
    }

    fn unlink(&self, path: &str) -> FarwelResult<()> {
        check(self.real.unlink(&self.host_path(path)?))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> FarwelResult<()> {
        let from = self.host_path(from)?;
        let to = self.host_path(to)?;
        std::fs::rename(
            from.to_str().map_err(FarwelError::backend)?,
            to.to_str().map_err(FarwelError::backend)?,
        )?;
        Ok(())
    }

    fn mkdir(&self, path: &str, mode: u32) -> FarwelResult<()> {
        check(self.real.mkdir(&self.host_path(path)?, mode as libc::mode_t))?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> FarwelResult<()> {
        check(self.real.rmdir(&self.host_path(path)?))?;
        Ok(())
    }

    fn file_size(&self, path: &str) -> FarwelResult<u64> {
        Ok(self.stat(path)?.st_size as u64)
    }
}
