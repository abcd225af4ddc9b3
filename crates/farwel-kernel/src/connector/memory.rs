//! In-memory backend.
//!
//! Everything lives in one ordered map keyed by canonical path. Data is
//! lost when the process exits.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::Backend;
use crate::error::{FarwelError, FarwelResult};
use crate::node::{DirEntry, FileNode};
use crate::path;

#[derive(Debug, Clone)]
enum Entry {
    File(Vec<u8>),
    Directory,
}

/// In-memory backend.
///
/// Parent directories are created implicitly by `create` and `mkdir`.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Entry>>,
    block_size: u64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty store holding only the root directory.
    pub fn new() -> Self {
        Self::with_block_size(super::DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: u64) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), Entry::Directory);
        Self {
            entries: RwLock::new(entries),
            block_size,
        }
    }

    fn ensure_parents(entries: &mut BTreeMap<String, Entry>, path: &str) -> FarwelResult<()> {
        let mut current = String::new();
        let parent = path::parent(path);
        for name in parent.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(name);
            match entries.entry(current.clone()).or_insert(Entry::Directory) {
                Entry::Directory => {}
                Entry::File(_) => return Err(FarwelError::not_a_directory(current)),
            }
        }
        Ok(())
    }

    fn has_children(entries: &BTreeMap<String, Entry>, dir: &str) -> bool {
        entries.keys().any(|k| path::is_descendant(k, dir))
    }
}

impl Backend for MemoryBackend {
    fn exists(&self, path: &str) -> FarwelResult<bool> {
        Ok(self.entries.read().contains_key(path))
    }

    fn create(&self, path: &str, _mode: u32) -> FarwelResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(path) {
            return Err(FarwelError::already_exists(path));
        }
        Self::ensure_parents(&mut entries, path)?;
        entries.insert(path.to_string(), Entry::File(Vec::new()));
        Ok(())
    }

    fn truncate(&self, path: &str) -> FarwelResult<()> {
        match self.entries.write().get_mut(path) {
            Some(Entry::File(data)) => {
                data.clear();
                Ok(())
            }
            Some(Entry::Directory) => Err(FarwelError::is_a_directory(path)),
            None => Err(FarwelError::not_found(path)),
        }
    }

    fn read(&self, file: &FileNode, buf: &mut [u8]) -> FarwelResult<usize> {
        let entries = self.entries.read();
        match entries.get(&file.path) {
            Some(Entry::File(data)) => {
                let start = usize::try_from(file.offset).unwrap_or(usize::MAX).min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
            Some(Entry::Directory) => Err(FarwelError::is_a_directory(&file.path)),
            None => Err(FarwelError::not_found(&file.path)),
        }
    }

    fn write(&self, file: &FileNode, buf: &[u8]) -> FarwelResult<usize> {
        let mut entries = self.entries.write();
        match entries.get_mut(&file.path) {
            Some(Entry::File(data)) => {
                let start = usize::try_from(file.offset)
                    .map_err(|_| FarwelError::invalid_path(&file.path))?;
                let end = start + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf);
                Ok(buf.len())
            }
            Some(Entry::Directory) => Err(FarwelError::is_a_directory(&file.path)),
            None => Err(FarwelError::not_found(&file.path)),
        }
    }

    fn list_dir(&self, dir: &str) -> FarwelResult<Vec<DirEntry>> {
        let entries = self.entries.read();
        match entries.get(dir) {
            Some(Entry::Directory) => {}
            Some(Entry::File(_)) => return Err(FarwelError::not_a_directory(dir)),
            None => return Err(FarwelError::not_found(dir)),
        }

        Ok(entries
            .iter()
            .filter(|(k, _)| k.as_str() != dir && path::parent(k) == dir)
            .map(|(k, entry)| match entry {
                Entry::File(_) => DirEntry::file(path::file_name(k)),
                Entry::Directory => DirEntry::directory(path::file_name(k)),
            })
            .collect())
    }

    fn unlink(&self, path: &str) -> FarwelResult<()> {
        let mut entries = self.entries.write();
        match entries.get(path) {
            Some(Entry::File(_)) => {
                entries.remove(path);
                Ok(())
            }
            Some(Entry::Directory) => Err(FarwelError::is_a_directory(path)),
            None => Err(FarwelError::not_found(path)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> FarwelResult<()> {
        let mut entries = self.entries.write();
        if !entries.contains_key(from) {
            return Err(FarwelError::not_found(from));
        }
        if from == to {
            return Ok(());
        }
        if path::is_descendant(to, from) {
            return Err(FarwelError::invalid_path(to));
        }
        match entries.get(to) {
            Some(Entry::Directory) if Self::has_children(&entries, to) => {
                return Err(FarwelError::directory_not_empty(to));
            }
            Some(Entry::Directory) if matches!(entries.get(from), Some(Entry::File(_))) => {
                return Err(FarwelError::is_a_directory(to));
            }
            Some(Entry::File(_)) if matches!(entries.get(from), Some(Entry::Directory)) => {
                return Err(FarwelError::not_a_directory(to));
            }
            _ => {}
        }
        Self::ensure_parents(&mut entries, to)?;

        let moved: Vec<String> = entries
            .keys()
            .filter(|k| k.as_str() == from || path::is_descendant(k, from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = entries.remove(&old) {
                entries.insert(path::rebase(&old, from, to), entry);
            }
        }
        Ok(())
    }

    fn mkdir(&self, path: &str, _mode: u32) -> FarwelResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(path) {
            return Err(FarwelError::already_exists(path));
        }
        Self::ensure_parents(&mut entries, path)?;
        entries.insert(path.to_string(), Entry::Directory);
        Ok(())
    }

    fn rmdir(&self, path: &str) -> FarwelResult<()> {
        let mut entries = self.entries.write();
        match entries.get(path) {
            Some(Entry::Directory) if path == "/" => Err(FarwelError::access_denied(path)),
            Some(Entry::Directory) if Self::has_children(&entries, path) => {
                Err(FarwelError::directory_not_empty(path))
            }
            Some(Entry::Directory) => {
                entries.remove(path);
                Ok(())
            }
            Some(Entry::File(_)) => Err(FarwelError::not_a_directory(path)),
            None => Err(FarwelError::not_found(path)),
        }
    }

    fn file_size(&self, path: &str) -> FarwelResult<u64> {
        match self.entries.read().get(path) {
            Some(Entry::File(data)) => Ok(data.len() as u64),
            Some(Entry::Directory) => Ok(0),
            None => Err(FarwelError::not_found(path)),
        }
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }
}
