//! A backend that stores nothing.
//!
//! Every path exists and is empty; writes are accepted in full and
//! discarded. Useful as a sink for paths a program must not touch.

use super::Backend;
use crate::error::FarwelResult;
use crate::node::{DirEntry, FileNode};

#[derive(Debug, Clone, Copy, Default)]
pub struct DummyBackend;

impl Backend for DummyBackend {
    fn exists(&self, _path: &str) -> FarwelResult<bool> {
        Ok(true)
    }

    fn create(&self, _path: &str, _mode: u32) -> FarwelResult<()> {
        Ok(())
    }

    fn truncate(&self, _path: &str) -> FarwelResult<()> {
        Ok(())
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

    fn unlink(&self, _path: &str) -> FarwelResult<()> {
        Ok(())
    }

    fn rename(&self, _from: &str, _to: &str) -> FarwelResult<()> {
        Ok(())
    }

    fn mkdir(&self, _path: &str, _mode: u32) -> FarwelResult<()> {
        Ok(())
    }

    fn rmdir(&self, _path: &str) -> FarwelResult<()> {
        Ok(())
    }

    fn file_size(&self, _path: &str) -> FarwelResult<u64> {
        Ok(0)
    }
}
