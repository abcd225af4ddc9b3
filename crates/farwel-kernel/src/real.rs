//! The genuine OS entry points.
//!
//! Once the interposer is loaded, the process-wide `open`, `read` and friends
//! are ours. Anything that needs the real call (fall-through, the passthrough
//! backend) goes through a [`RealOs`], and [`LibcOs`] finds the next
//! definition in symbol resolution order with `dlsym(RTLD_NEXT, ..)`.

use libc::{c_char, c_int, c_long, c_void, mode_t, size_t, ssize_t};
use std::ffi::CStr;

/// The real-OS capability set.
///
/// Return values and `errno` follow the POSIX contracts of the functions of
/// the same name.
pub trait RealOs: Send + Sync {
    fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> c_int;
    fn read(&self, fd: c_int, buf: &mut [u8]) -> ssize_t;
    fn write(&self, fd: c_int, buf: &[u8]) -> ssize_t;
    fn close(&self, fd: c_int) -> c_int;
    fn unlink(&self, path: &CStr) -> c_int;
    fn mkdir(&self, path: &CStr, mode: mode_t) -> c_int;
    fn rmdir(&self, path: &CStr) -> c_int;
    fn opendir(&self, path: &CStr) -> *mut libc::DIR;

    /// # Safety
    /// `dir` must be a live stream returned by this object's `opendir`.
    unsafe fn readdir(&self, dir: *mut libc::DIR) -> *mut libc::dirent;

    /// # Safety
    /// `dir` must be a live stream returned by this object's `opendir`.
    unsafe fn closedir(&self, dir: *mut libc::DIR) -> c_int;

    fn fcntl(&self, fd: c_int, cmd: c_int, arg: c_long) -> c_int;
    fn stat(&self, path: &CStr, buf: &mut libc::stat) -> c_int;
    fn lstat(&self, path: &CStr, buf: &mut libc::stat) -> c_int;
    fn fstat(&self, fd: c_int, buf: &mut libc::stat) -> c_int;
}

/// Set the calling thread's `errno`.
pub fn set_errno(code: c_int) {
    // SAFETY: these return the calling thread's errno slot, valid for the
    // lifetime of the thread.
    #[cfg(target_os = "linux")]
    let slot = unsafe { libc::__errno_location() };
    #[cfg(target_vendor = "apple")]
    let slot = unsafe { libc::__error() };
    // SAFETY: see above.
    unsafe { *slot = code };
}

/// Read the calling thread's `errno`.
pub fn errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type WriteFn = unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type PathFn = unsafe extern "C" fn(*const c_char) -> c_int;
type MkdirFn = unsafe extern "C" fn(*const c_char, mode_t) -> c_int;
type OpendirFn = unsafe extern "C" fn(*const c_char) -> *mut libc::DIR;
type ReaddirFn = unsafe extern "C" fn(*mut libc::DIR) -> *mut libc::dirent;
type ClosedirFn = unsafe extern "C" fn(*mut libc::DIR) -> c_int;
type FcntlFn = unsafe extern "C" fn(c_int, c_int, ...) -> c_int;
type StatFn = unsafe extern "C" fn(*const c_char, *mut libc::stat) -> c_int;
type FstatFn = unsafe extern "C" fn(c_int, *mut libc::stat) -> c_int;

/// Look up the next definition of a symbol after the calling object.
macro_rules! next_symbol {
    ($name:literal as $ty:ty) => {{
        // SAFETY: the name is NUL-terminated, and the symbol, if present, is
        // the libc function with the signature named by `$ty`.
        unsafe {
            let sym = libc::dlsym(libc::RTLD_NEXT, concat!($name, "\0").as_ptr().cast());
            std::mem::transmute::<*mut c_void, Option<$ty>>(sym)
        }
    }};
}

/// Call a resolved entry point, or fail with `ENOSYS` if the host libc
/// does not export it.
macro_rules! call_or_enosys {
    ($slot:expr, $fail:expr, |$f:ident| $call:expr) => {
        match $slot {
            // SAFETY: arguments come from safe references with matching sizes.
            Some($f) => unsafe { $call },
            None => {
                set_errno(libc::ENOSYS);
                $fail
            }
        }
    };
}

/// The host libc, resolved once with `dlsym(RTLD_NEXT, ..)`.
#[derive(Debug, Clone, Copy)]
pub struct LibcOs {
    open: Option<OpenFn>,
    read: Option<ReadFn>,
    write: Option<WriteFn>,
    close: Option<CloseFn>,
    unlink: Option<PathFn>,
    mkdir: Option<MkdirFn>,
    rmdir: Option<PathFn>,
    opendir: Option<OpendirFn>,
    readdir: Option<ReaddirFn>,
    closedir: Option<ClosedirFn>,
    fcntl: Option<FcntlFn>,
    stat: Option<StatFn>,
    lstat: Option<StatFn>,
    fstat: Option<FstatFn>,
}

impl LibcOs {
    /// Resolve every entry point.
    ///
    /// Missing symbols are tolerated; calling one reports `ENOSYS`.
    pub fn resolve() -> Self {
        Self {
            open: next_symbol!("open" as OpenFn),
            read: next_symbol!("read" as ReadFn),
            write: next_symbol!("write" as WriteFn),
            close: next_symbol!("close" as CloseFn),
            unlink: next_symbol!("unlink" as PathFn),
            mkdir: next_symbol!("mkdir" as MkdirFn),
            rmdir: next_symbol!("rmdir" as PathFn),
            opendir: next_symbol!("opendir" as OpendirFn),
            readdir: next_symbol!("readdir" as ReaddirFn),
            closedir: next_symbol!("closedir" as ClosedirFn),
            fcntl: next_symbol!("fcntl" as FcntlFn),
            stat: next_symbol!("stat" as StatFn),
            lstat: next_symbol!("lstat" as StatFn),
            fstat: next_symbol!("fstat" as FstatFn),
        }
    }
}

impl RealOs for LibcOs {
    fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> c_int {
        call_or_enosys!(self.open, -1, |f| f(path.as_ptr(), flags, mode as libc::c_uint))
    }

    fn read(&self, fd: c_int, buf: &mut [u8]) -> ssize_t {
        call_or_enosys!(self.read, -1, |f| f(fd, buf.as_mut_ptr().cast(), buf.len()))
    }

    fn write(&self, fd: c_int, buf: &[u8]) -> ssize_t {
        call_or_enosys!(self.write, -1, |f| f(fd, buf.as_ptr().cast(), buf.len()))
    }

    fn close(&self, fd: c_int) -> c_int {
        call_or_enosys!(self.close, -1, |f| f(fd))
    }

    fn unlink(&self, path: &CStr) -> c_int {
        call_or_enosys!(self.unlink, -1, |f| f(path.as_ptr()))
    }

    fn mkdir(&self, path: &CStr, mode: mode_t) -> c_int {
        call_or_enosys!(self.mkdir, -1, |f| f(path.as_ptr(), mode))
    }

    fn rmdir(&self, path: &CStr) -> c_int {
        call_or_enosys!(self.rmdir, -1, |f| f(path.as_ptr()))
    }

    fn opendir(&self, path: &CStr) -> *mut libc::DIR {
        call_or_enosys!(self.opendir, std::ptr::null_mut(), |f| f(path.as_ptr()))
    }

    unsafe fn readdir(&self, dir: *mut libc::DIR) -> *mut libc::dirent {
        call_or_enosys!(self.readdir, std::ptr::null_mut(), |f| f(dir))
    }

    unsafe fn closedir(&self, dir: *mut libc::DIR) -> c_int {
        call_or_enosys!(self.closedir, -1, |f| f(dir))
    }

    fn fcntl(&self, fd: c_int, cmd: c_int, arg: c_long) -> c_int {
        call_or_enosys!(self.fcntl, -1, |f| f(fd, cmd, arg))
    }

    fn stat(&self, path: &CStr, buf: &mut libc::stat) -> c_int {
        call_or_enosys!(self.stat, -1, |f| f(path.as_ptr(), buf))
    }

    fn lstat(&self, path: &CStr, buf: &mut libc::stat) -> c_int {
        call_or_enosys!(self.lstat, -1, |f| f(path.as_ptr(), buf))
    }

    fn fstat(&self, fd: c_int, buf: &mut libc::stat) -> c_int {
        call_or_enosys!(self.fstat, -1, |f| f(fd, buf))
    }
}
