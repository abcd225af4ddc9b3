//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

use farwel_kernel::real::set_errno;
use farwel_kernel::{
    Backend, DescriptorAllocator, DirEntry, Dispatcher, FarwelError, FarwelResult, FileNode,
    RealOs,
};

/// Real-OS stand-in that records every call and answers with fixed values.
#[derive(Debug, Default)]
pub struct RecordingOs {
    pub calls: Mutex<Vec<String>>,
}

pub const REAL_FD: libc::c_int = 3;

impl RecordingOs {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl RealOs for RecordingOs {
    fn open(&self, path: &CStr, flags: libc::c_int, mode: libc::mode_t) -> libc::c_int {
        self.record(format!("open {} {flags:#o} {mode:#o}", path.to_str().unwrap()));
        if path.to_bytes().ends_with(b"missing") {
            set_errno(libc::ENOENT);
            return -1;
        }
        REAL_FD
    }

    fn read(&self, fd: libc::c_int, buf: &mut [u8]) -> libc::ssize_t {
        self.record(format!("read {fd} {}", buf.len()));
        buf.len().min(2) as libc::ssize_t
    }

    fn write(&self, fd: libc::c_int, buf: &[u8]) -> libc::ssize_t {
        self.record(format!("write {fd} {}", buf.len()));
        buf.len() as libc::ssize_t
    }

    fn close(&self, fd: libc::c_int) -> libc::c_int {
        self.record(format!("close {fd}"));
        0
    }

    fn unlink(&self, path: &CStr) -> libc::c_int {
        self.record(format!("unlink {}", path.to_str().unwrap()));
        0
    }

    fn mkdir(&self, path: &CStr, mode: libc::mode_t) -> libc::c_int {
        self.record(format!("mkdir {} {mode:#o}", path.to_str().unwrap()));
        0
    }

    fn rmdir(&self, path: &CStr) -> libc::c_int {
        self.record(format!("rmdir {}", path.to_str().unwrap()));
        0
    }

    fn opendir(&self, path: &CStr) -> *mut libc::DIR {
        self.record(format!("opendir {}", path.to_str().unwrap()));
        std::ptr::NonNull::<libc::DIR>::dangling().as_ptr()
    }

    unsafe fn readdir(&self, _dir: *mut libc::DIR) -> *mut libc::dirent {
        self.record("readdir".to_string());
        std::ptr::null_mut()
    }

    unsafe fn closedir(&self, _dir: *mut libc::DIR) -> libc::c_int {
        self.record("closedir".to_string());
        0
    }

    fn fcntl(&self, fd: libc::c_int, cmd: libc::c_int, arg: libc::c_long) -> libc::c_int {
        self.record(format!("fcntl {fd} {cmd} {arg}"));
        42
    }

    fn stat(&self, path: &CStr, buf: &mut libc::stat) -> libc::c_int {
        self.record(format!("stat {}", path.to_str().unwrap()));
        buf.st_size = 123;
        0
    }

    fn lstat(&self, path: &CStr, buf: &mut libc::stat) -> libc::c_int {
        self.record(format!("lstat {}", path.to_str().unwrap()));
        buf.st_size = 321;
        0
    }

    fn fstat(&self, fd: libc::c_int, buf: &mut libc::stat) -> libc::c_int {
        self.record(format!("fstat {fd}"));
        buf.st_size = 7;
        0
    }
}

/// Backend with a fixed existence answer that records mutations.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    pub exists: bool,
    pub fail_mutations: bool,
    pub calls: Mutex<Vec<&'static str>>,
}

impl ScriptedBackend {
    pub fn new(exists: bool) -> Self {
        Self {
            exists,
            ..Self::default()
        }
    }

    pub fn failing(exists: bool) -> Self {
        Self {
            exists,
            fail_mutations: true,
            ..Self::default()
        }
    }

    fn mutate(&self, call: &'static str) -> FarwelResult<()> {
        self.calls.lock().push(call);
        if self.fail_mutations {
            Err(FarwelError::backend("refused"))
        } else {
            Ok(())
        }
    }
}

impl Backend for ScriptedBackend {
    fn exists(&self, _path: &str) -> FarwelResult<bool> {
        Ok(self.exists)
    }

    fn create(&self, _path: &str, _mode: u32) -> FarwelResult<()> {
        self.mutate("create")
    }

    fn truncate(&self, _path: &str) -> FarwelResult<()> {
        self.mutate("truncate")
    }

    fn read(&self, _file: &FileNode, _buf: &mut [u8]) -> FarwelResult<usize> {
        Ok(0)
    }

    fn write(&self, _file: &FileNode, data: &[u8]) -> FarwelResult<usize> {
        Ok(data.len())
    }

    fn list_dir(&self, _path: &str) -> FarwelResult<Vec<DirEntry>> {
        Ok(Vec::new())
    }

    fn file_size(&self, _path: &str) -> FarwelResult<u64> {
        Ok(0)
    }
}

/// Shared handle so a test can inspect a backend after handing it over.
pub struct Shared<B>(pub Arc<B>);

impl<B: Backend> Backend for Shared<B> {
    fn exists(&self, path: &str) -> FarwelResult<bool> {
        self.0.exists(path)
    }

    fn create(&self, path: &str, mode: u32) -> FarwelResult<()> {
        self.0.create(path, mode)
    }

    fn truncate(&self, path: &str) -> FarwelResult<()> {
        self.0.truncate(path)
    }

    fn read(&self, file: &FileNode, buf: &mut [u8]) -> FarwelResult<usize> {
        self.0.read(file, buf)
    }

    fn write(&self, file: &FileNode, data: &[u8]) -> FarwelResult<usize> {
        self.0.write(file, data)
    }

    fn list_dir(&self, path: &str) -> FarwelResult<Vec<DirEntry>> {
        self.0.list_dir(path)
    }

    fn file_size(&self, path: &str) -> FarwelResult<u64> {
        self.0.file_size(path)
    }
}

/// Dispatcher over a recording real OS with a small fixed watermark.
pub fn dispatcher(real: Arc<RecordingOs>) -> Dispatcher {
    Dispatcher::with_allocator(real, DescriptorAllocator::with_watermark(10_000))
}
