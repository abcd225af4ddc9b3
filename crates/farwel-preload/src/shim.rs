//! Exported C symbols.
//!
//! Variadic prototypes (`open`, `fcntl`) are received with their optional
//! argument as a fixed trailing parameter. On the Linux calling conventions
//! that is where the caller placed it; it is only read when the flags say
//! it was passed.

use libc::{c_char, c_int, c_long, c_void, mode_t, size_t, ssize_t};
use std::ffi::CStr;

use farwel_kernel::RealOs;
use farwel_kernel::real::set_errno;

use crate::{enter, real};

/// Whether `open` received a mode argument.
fn takes_mode(flags: c_int) -> bool {
    flags & libc::O_CREAT != 0 || flags & libc::O_TMPFILE == libc::O_TMPFILE
}

/// # Safety
/// `path` is null or a NUL-terminated string.
unsafe fn c_path<'a>(path: *const c_char) -> Option<&'a CStr> {
    if path.is_null() {
        set_errno(libc::EFAULT);
        None
    } else {
        // SAFETY: non-null and NUL-terminated per the caller.
        Some(unsafe { CStr::from_ptr(path) })
    }
}

/// # Safety
/// `buf` is null or valid for `len` bytes.
unsafe fn buffer<'a>(buf: *const c_void, len: size_t) -> Option<&'a [u8]> {
    match (buf.is_null(), len) {
        (_, 0) => Some(&[]),
        (true, _) => {
            set_errno(libc::EFAULT);
            None
        }
        // SAFETY: valid for `len` bytes per the caller.
        (false, _) => Some(unsafe { std::slice::from_raw_parts(buf.cast(), len) }),
    }
}

/// # Safety
/// `buf` is null or valid for writes of `len` bytes.
unsafe fn buffer_mut<'a>(buf: *mut c_void, len: size_t) -> Option<&'a mut [u8]> {
    match (buf.is_null(), len) {
        (_, 0) => Some(&mut []),
        (true, _) => {
            set_errno(libc::EFAULT);
            None
        }
        // SAFETY: valid for writes of `len` bytes per the caller.
        (false, _) => Some(unsafe { std::slice::from_raw_parts_mut(buf.cast(), len) }),
    }
}

// ============================================================================
// Files
// ============================================================================

/// # Safety
/// C `open(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let Some(path) = (unsafe { c_path(path) }) else {
        return -1;
    };
    let mode = takes_mode(flags).then_some(mode);
    match enter() {
        Some(e) => e.run(-1, |i| i.open(path, flags, mode)),
        None => real().open(path, flags, mode.unwrap_or(0)),
    }
}

/// # Safety
/// C `creat(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat(path: *const c_char, mode: mode_t) -> c_int {
    let Some(path) = (unsafe { c_path(path) }) else {
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.creat(path, mode)),
        None => real().open(path, farwel_kernel::surface::CREAT_FLAGS, mode),
    }
}

/// # Safety
/// C `read(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    let Some(buf) = (unsafe { buffer_mut(buf, count) }) else {
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.read(fd, buf)),
        None => real().read(fd, buf),
    }
}

/// # Safety
/// C `write(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    let Some(buf) = (unsafe { buffer(buf, count) }) else {
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.write(fd, buf)),
        None => real().write(fd, buf),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn close(fd: c_int) -> c_int {
    match enter() {
        Some(e) => e.run(-1, |i| i.close(fd)),
        None => real().close(fd),
    }
}

/// # Safety
/// C `fcntl(2)` contract. The third argument is forwarded as a
/// pointer-sized integer whatever its declared type.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: c_long) -> c_int {
    match enter() {
        Some(e) => e.run(-1, |i| i.fcntl(fd, cmd, arg)),
        None => real().fcntl(fd, cmd, arg),
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// # Safety
/// C `stat(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    let Some(path) = (unsafe { c_path(path) }) else {
        return -1;
    };
    // SAFETY: caller passes a writable stat record or null.
    let Some(buf) = (unsafe { buf.as_mut() }) else {
        set_errno(libc::EFAULT);
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.stat(path, buf)),
        None => real().stat(path, buf),
    }
}

/// # Safety
/// C `lstat(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    let Some(path) = (unsafe { c_path(path) }) else {
        return -1;
    };
    // SAFETY: caller passes a writable stat record or null.
    let Some(buf) = (unsafe { buf.as_mut() }) else {
        set_errno(libc::EFAULT);
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.lstat(path, buf)),
        None => real().lstat(path, buf),
    }
}

/// # Safety
/// C `fstat(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int {
    // SAFETY: caller passes a writable stat record or null.
    let Some(buf) = (unsafe { buf.as_mut() }) else {
        set_errno(libc::EFAULT);
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.fstat(fd, buf)),
        None => real().fstat(fd, buf),
    }
}

// ============================================================================
// Path mutations
// ============================================================================

/// # Safety
/// C `mkdir(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mkdir(path: *const c_char, mode: mode_t) -> c_int {
    let Some(path) = (unsafe { c_path(path) }) else {
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.mkdir(path, mode)),
        None => real().mkdir(path, mode),
    }
}

/// # Safety
/// C `rmdir(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rmdir(path: *const c_char) -> c_int {
    let Some(path) = (unsafe { c_path(path) }) else {
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.rmdir(path)),
        None => real().rmdir(path),
    }
}

/// # Safety
/// C `unlink(2)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn unlink(path: *const c_char) -> c_int {
    let Some(path) = (unsafe { c_path(path) }) else {
        return -1;
    };
    match enter() {
        Some(e) => e.run(-1, |i| i.unlink(path)),
        None => real().unlink(path),
    }
}

// ============================================================================
// Directory streams
// ============================================================================

/// # Safety
/// C `opendir(3)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opendir(path: *const c_char) -> *mut libc::DIR {
    let Some(path) = (unsafe { c_path(path) }) else {
        return std::ptr::null_mut();
    };
    match enter() {
        Some(e) => e.run(std::ptr::null_mut(), |i| i.opendir(path)),
        None => real().opendir(path),
    }
}

/// # Safety
/// `dir` is a stream returned by `opendir` and not yet closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn readdir(dir: *mut libc::DIR) -> *mut libc::dirent {
    match enter() {
        // SAFETY: forwarded under the caller's contract.
        Some(e) => e.run(std::ptr::null_mut(), |i| unsafe { i.readdir(dir) }),
        None => unsafe { real().readdir(dir) },
    }
}

/// # Safety
/// `dir` is a stream returned by `opendir` and not yet closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn closedir(dir: *mut libc::DIR) -> c_int {
    match enter() {
        // SAFETY: forwarded under the caller's contract.
        Some(e) => e.run(-1, |i| unsafe { i.closedir(dir) }),
        None => unsafe { real().closedir(dir) },
    }
}
