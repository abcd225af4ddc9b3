//! The intercepted call surface.
//!
//! Each method mirrors one POSIX call. When no connector claims the path or
//! descriptor, the call goes to the [`RealOs`] with the same arguments and
//! its result is returned untouched. Otherwise the resolved connector
//! handles it and failures come back as `-1`/NULL with `errno` set.
//!
//! Directory streams opened through a connector are represented by
//! heap-allocated `VirtualDir` records owned here. The `DIR *` handed to
//! the host is the record's address, used purely as a lookup key; it is
//! never dereferenced as a real `DIR`.

use libc::{c_int, c_long, mode_t, ssize_t};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::Arc;

use crate::config::FarwelConfig;
use crate::descriptor::Fd;
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigResult, FarwelError, FarwelResult};
use crate::logging;
use crate::node::{DirRecord, OpenFlags};
use crate::real::{RealOs, set_errno};

/// Flags `creat` passes to `open`.
pub const CREAT_FLAGS: c_int = libc::O_CREAT | libc::O_TRUNC | libc::O_WRONLY;

/// Directory stream minted for a connector-owned directory.
struct VirtualDir {
    fd: Fd,
    /// Storage for the record most recently returned by `readdir`.
    entry: libc::dirent,
}

fn fail(e: FarwelError) -> c_int {
    set_errno(e.errno());
    -1
}

fn status(result: FarwelResult<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => fail(e),
    }
}

fn fill_dirent(entry: &mut libc::dirent, record: &DirRecord) {
    // SAFETY: dirent is plain old data.
    *entry = unsafe { std::mem::zeroed() };
    entry.d_ino = record.ino as _;
    entry.d_type = record.kind.d_type();
    entry.d_reclen = std::mem::size_of::<libc::dirent>() as u16;
    #[cfg(target_os = "linux")]
    {
        entry.d_off = record.ino as _;
    }

    let name = record.name.as_bytes();
    let n = name.len().min(entry.d_name.len() - 1);
    for (dst, src) in entry.d_name.iter_mut().zip(&name[..n]) {
        *dst = *src as libc::c_char;
    }
    #[cfg(target_vendor = "apple")]
    {
        entry.d_namlen = n as u16;
    }
}

/// Routes every intercepted call.
pub struct Interceptor {
    dispatcher: Dispatcher,
    real: Arc<dyn RealOs>,
    streams: Mutex<HashMap<usize, Box<VirtualDir>>>,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("dispatcher", &self.dispatcher)
            .field("streams", &self.streams.lock().len())
            .finish()
    }
}

impl Interceptor {
    pub fn new(dispatcher: Dispatcher, real: Arc<dyn RealOs>) -> Self {
        Self {
            dispatcher,
            real,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Load the configuration named by `FRWL_CONFIG_FILE`, install logging
    /// and build the routing table.
    pub fn from_env(real: Arc<dyn RealOs>) -> ConfigResult<Self> {
        let config = FarwelConfig::from_env()?;
        logging::init(&config.log)?;
        let dispatcher = Dispatcher::from_config(Arc::clone(&real), &config);
        Ok(Self::new(dispatcher, real))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn route(&self, path: &CStr) -> Option<(&crate::connector::Connector, String)> {
        let route = path.to_str().ok().and_then(|p| self.dispatcher.route(p));
        if route.is_none() {
            tracing::trace!(path = ?path, "fall through");
        }
        route
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// `open(path, flags[, mode])`. `mode` is only meaningful with `O_CREAT`.
    pub fn open(&self, path: &CStr, flags: c_int, mode: Option<mode_t>) -> c_int {
        let mode = mode.unwrap_or(0);
        match self.route(path) {
            None => self.real.open(path, flags, mode),
            Some((connector, path)) => connector
                .open(&path, OpenFlags(flags), mode as u32)
                .unwrap_or_else(fail),
        }
    }

    /// `creat(path, mode)`, i.e. `open` with `O_CREAT|O_TRUNC|O_WRONLY`.
    pub fn creat(&self, path: &CStr, mode: mode_t) -> c_int {
        self.open(path, CREAT_FLAGS, Some(mode))
    }

    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> ssize_t {
        match self.dispatcher.resolve_by_descriptor(fd) {
            None => self.real.read(fd, buf),
            Some(connector) => match connector.read(fd, buf) {
                Ok(n) => n as ssize_t,
                Err(e) => fail(e) as ssize_t,
            },
        }
    }

    pub fn write(&self, fd: Fd, buf: &[u8]) -> ssize_t {
        match self.dispatcher.resolve_by_descriptor(fd) {
            None => self.real.write(fd, buf),
            Some(connector) => match connector.write(fd, buf) {
                Ok(n) => n as ssize_t,
                Err(e) => fail(e) as ssize_t,
            },
        }
    }

    pub fn close(&self, fd: Fd) -> c_int {
        match self.dispatcher.resolve_by_descriptor(fd) {
            None => self.real.close(fd),
            Some(connector) => status(connector.close(fd)),
        }
    }

    pub fn fcntl(&self, fd: Fd, cmd: c_int, arg: c_long) -> c_int {
        match self.dispatcher.resolve_by_descriptor(fd) {
            None => self.real.fcntl(fd, cmd, arg),
            Some(connector) => connector.fcntl(fd, cmd).unwrap_or_else(fail),
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn stat(&self, path: &CStr, buf: &mut libc::stat) -> c_int {
        match self.route(path) {
            None => self.real.stat(path, buf),
            Some((connector, path)) => status(connector.stat(&path).map(|st| st.fill(buf))),
        }
    }

    /// Same as `stat` for virtual paths; there are no virtual symlinks.
    pub fn lstat(&self, path: &CStr, buf: &mut libc::stat) -> c_int {
        match self.route(path) {
            None => self.real.lstat(path, buf),
            Some((connector, path)) => status(connector.stat(&path).map(|st| st.fill(buf))),
        }
    }

    pub fn fstat(&self, fd: Fd, buf: &mut libc::stat) -> c_int {
        match self.dispatcher.resolve_by_descriptor(fd) {
            None => self.real.fstat(fd, buf),
            Some(connector) => status(connector.fstat(fd).map(|st| st.fill(buf))),
        }
    }

    // ========================================================================
    // Path mutations
    // ========================================================================

    pub fn mkdir(&self, path: &CStr, mode: mode_t) -> c_int {
        match self.route(path) {
            None => self.real.mkdir(path, mode),
            Some((connector, path)) => status(connector.mkdir(&path, mode as u32)),
        }
    }

    pub fn rmdir(&self, path: &CStr) -> c_int {
        match self.route(path) {
            None => self.real.rmdir(path),
            Some((connector, path)) => status(connector.rmdir(&path)),
        }
    }

    pub fn unlink(&self, path: &CStr) -> c_int {
        match self.route(path) {
            None => self.real.unlink(path),
            Some((connector, path)) => status(connector.unlink(&path)),
        }
    }

    // ========================================================================
    // Directory streams
    // ========================================================================

    pub fn opendir(&self, path: &CStr) -> *mut libc::DIR {
        let Some((connector, path)) = self.route(path) else {
            return self.real.opendir(path);
        };
        match connector.open_dir(&path) {
            Ok(fd) => {
                let stream = Box::new(VirtualDir {
                    fd,
                    // SAFETY: dirent is plain old data.
                    entry: unsafe { std::mem::zeroed() },
                });
                let handle = &*stream as *const VirtualDir as usize;
                self.streams.lock().insert(handle, stream);
                handle as *mut libc::DIR
            }
            Err(e) => {
                fail(e);
                std::ptr::null_mut()
            }
        }
    }

    /// Whether `dir` is a stream minted by [`Interceptor::opendir`].
    pub fn is_virtual_stream(&self, dir: *mut libc::DIR) -> bool {
        self.streams.lock().contains_key(&(dir as usize))
    }

    /// # Safety
    /// `dir` must be a live stream from this interceptor's `opendir`.
    pub unsafe fn readdir(&self, dir: *mut libc::DIR) -> *mut libc::dirent {
        if !self.is_virtual_stream(dir) {
            // SAFETY: not ours, so it came from the real opendir.
            return unsafe { self.real.readdir(dir) };
        }
        let mut streams = self.streams.lock();
        let Some(stream) = streams.get_mut(&(dir as usize)) else {
            set_errno(libc::EBADF);
            return std::ptr::null_mut();
        };
        let record = self
            .dispatcher
            .resolve_by_descriptor(stream.fd)
            .ok_or(FarwelError::BadDescriptor(stream.fd))
            .and_then(|connector| connector.read_dir(stream.fd));
        match record {
            Ok(Some(record)) => {
                fill_dirent(&mut stream.entry, &record);
                &mut stream.entry as *mut libc::dirent
            }
            // End of stream leaves errno alone.
            Ok(None) => std::ptr::null_mut(),
            Err(e) => {
                fail(e);
                std::ptr::null_mut()
            }
        }
    }

    /// # Safety
    /// `dir` must be a live stream from this interceptor's `opendir`.
    pub unsafe fn closedir(&self, dir: *mut libc::DIR) -> c_int {
        let Some(stream) = self.streams.lock().remove(&(dir as usize)) else {
            // SAFETY: not ours, so it came from the real opendir.
            return unsafe { self.real.closedir(dir) };
        };
        match self.dispatcher.resolve_by_descriptor(stream.fd) {
            Some(connector) => status(connector.close_dir(stream.fd)),
            None => fail(FarwelError::BadDescriptor(stream.fd)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MemoryBackend;
    use crate::descriptor::DescriptorAllocator;
    use crate::real::{LibcOs, errno};
    use std::ffi::CString;

    fn interceptor() -> Interceptor {
        let real: Arc<dyn RealOs> = Arc::new(LibcOs::resolve());
        let mut d = Dispatcher::with_allocator(Arc::clone(&real), DescriptorAllocator::new());
        d.add_connector("mem", Box::new(MemoryBackend::new())).unwrap();
        d.add_location("regexp://^/virtual/", "mem", 0).unwrap();
        Interceptor::new(d, real)
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_virtual_roundtrip() {
        let i = interceptor();
        let fd = i.creat(&c("/virtual/x"), 0o644);
        assert!(fd > i.dispatcher().allocator().watermark());
        assert_eq!(i.write(fd, b"hello"), 5);
        assert_eq!(i.close(fd), 0);

        let fd = i.open(&c("/virtual/x"), libc::O_RDONLY, None);
        let mut buf = [0u8; 16];
        assert_eq!(i.read(fd, &mut buf), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(i.close(fd), 0);
        assert_eq!(i.close(fd), -1);
        assert_eq!(errno(), libc::EBADF);
    }

    #[test]
    fn test_errno_from_connector() {
        let i = interceptor();
        assert_eq!(i.open(&c("/virtual/missing"), libc::O_RDONLY, None), -1);
        assert_eq!(errno(), libc::ENOENT);

        let flags = libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY;
        let fd = i.open(&c("/virtual/y"), flags, Some(0o600));
        assert!(fd > 0);
        assert_eq!(i.open(&c("/virtual/y"), flags, Some(0o600)), -1);
        assert_eq!(errno(), libc::EEXIST);
    }

    #[test]
    fn test_stat_synthesized() {
        let i = interceptor();
        let fd = i.creat(&c("/virtual/s"), 0o644);
        i.write(fd, &[1u8; 4097]);

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        assert_eq!(i.fstat(fd, &mut st), 0);
        assert_eq!(st.st_size, 4097);
        assert_eq!(st.st_blocks, 2);

        assert_eq!(i.stat(&c("/virtual/s"), &mut st), 0);
        assert_eq!(i.lstat(&c("/virtual/s"), &mut st), 0);
        assert_eq!(i.stat(&c("/virtual/none"), &mut st), -1);
        assert_eq!(errno(), libc::ENOENT);
    }

    #[test]
    fn test_directory_stream() {
        let i = interceptor();
        assert_eq!(i.mkdir(&c("/virtual/d"), 0o755), 0);
        for name in ["a", "b"] {
            let fd = i.creat(&c(&format!("/virtual/d/{name}")), 0o644);
            i.close(fd);
        }

        let dir = i.opendir(&c("/virtual/d"));
        assert!(!dir.is_null());
        assert!(i.is_virtual_stream(dir));

        let mut names = Vec::new();
        loop {
            let ent = unsafe { i.readdir(dir) };
            if ent.is_null() {
                break;
            }
            let ent = unsafe { &*ent };
            let name = unsafe { CStr::from_ptr(ent.d_name.as_ptr()) };
            names.push(name.to_str().unwrap().to_string());
            assert_eq!(ent.d_type, libc::DT_REG);
        }
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(unsafe { i.closedir(dir) }, 0);
        assert!(!i.is_virtual_stream(dir));

        assert!(i.opendir(&c("/virtual/nope")).is_null());
        assert_eq!(errno(), libc::ENOENT);
    }

    #[test]
    fn test_fcntl_virtual() {
        let i = interceptor();
        let fd = i.creat(&c("/virtual/f"), 0o644);
        assert_eq!(i.fcntl(fd, libc::F_GETFL, 0), CREAT_FLAGS);
        assert_eq!(i.fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC as c_long), 0);

        assert_eq!(i.fcntl(fd, libc::F_DUPFD, 0), -1);
        assert_eq!(errno(), libc::EINVAL);
        assert_eq!(i.fcntl(fd, libc::F_DUPFD_CLOEXEC, 0), -1);
        assert_eq!(errno(), libc::EINVAL);
    }

    #[test]
    fn test_fall_through_to_real_fs() {
        let i = interceptor();
        let tmp = tempfile::tempdir().unwrap();
        let file = c(tmp.path().join("real.txt").to_str().unwrap());

        let fd = i.creat(&file, 0o644);
        assert!(fd >= 0 && fd < i.dispatcher().allocator().watermark());
        assert_eq!(i.write(fd, b"real"), 4);
        assert_eq!(i.close(fd), 0);
        assert_eq!(std::fs::read(tmp.path().join("real.txt")).unwrap(), b"real");

        let dir = i.opendir(&c(tmp.path().to_str().unwrap()));
        assert!(!dir.is_null());
        assert!(!i.is_virtual_stream(dir));
        assert_eq!(unsafe { i.closedir(dir) }, 0);

        assert_eq!(i.unlink(&file), 0);
        assert_eq!(i.unlink(&file), -1);
        assert_eq!(errno(), libc::ENOENT);
    }
}
