//! SQLite-backed store.
//!
//! One row per entry: the canonical path in the key column, contents in a
//! BLOB value column, and the parent directory's path in the parent column.
//! Directories are rows with an empty value. Table and column names come
//! from configuration.

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use super::Backend;
use crate::error::{FarwelError, FarwelResult};
use crate::node::{DirEntry, EntryKind, FileNode};
use crate::path;

/// Backend-specific fields of an `sqldb` connector entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Database file; `:memory:` for a private in-memory database.
    #[serde(alias = "conn_str")]
    pub path: String,
    pub table_name: String,
    pub key_column: String,
    pub value_column: String,
    pub parent_column: String,
    /// Create the table if it is missing.
    pub create_table: bool,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            table_name: "files".to_string(),
            key_column: "key".to_string(),
            value_column: "value".to_string(),
            parent_column: "parent".to_string(),
            create_table: true,
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// SQL text with the configured identifiers spliced in.
#[derive(Debug)]
struct Queries {
    schema: String,
    exists: String,
    insert: String,
    truncate: String,
    select: String,
    update: String,
    length: String,
    children: String,
    delete: String,
    delete_target: String,
    reparent_subtree: String,
    rekey_subtree: String,
    set_parent: String,
}

impl Queries {
    fn new(c: &SqlConfig) -> FarwelResult<Self> {
        for name in [&c.table_name, &c.key_column, &c.value_column, &c.parent_column] {
            if !is_identifier(name) {
                return Err(FarwelError::backend(format!("invalid SQL identifier {name:?}")));
            }
        }
        let (t, k, v, p) = (&c.table_name, &c.key_column, &c.value_column, &c.parent_column);
        let under = |col: &str| {
            format!("({col} = ?1 OR substr({col}, 1, length(?1) + 1) = ?1 || '/')")
        };
        Ok(Self {
            schema: format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    {k} TEXT PRIMARY KEY,
                    {v} BLOB NOT NULL DEFAULT X'',
                    {p} TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{t}_{p} ON {t}({p});"
            ),
            exists: format!("SELECT COUNT(*) FROM {t} WHERE {k} = ?1"),
            insert: format!("INSERT INTO {t} ({k}, {v}, {p}) VALUES (?1, X'', ?2)"),
            truncate: format!("UPDATE {t} SET {v} = X'' WHERE {k} = ?1"),
            select: format!("SELECT {v} FROM {t} WHERE {k} = ?1"),
            update: format!("UPDATE {t} SET {v} = ?1 WHERE {k} = ?2"),
            length: format!("SELECT length({v}) FROM {t} WHERE {k} = ?1"),
            children: format!("SELECT {k} FROM {t} WHERE {p} = ?1 AND {k} != ?1 ORDER BY {k}"),
            delete: format!("DELETE FROM {t} WHERE {k} = ?1 OR {p} = ?1"),
            delete_target: format!("DELETE FROM {t} WHERE {}", under(k)),
            reparent_subtree: format!(
                "UPDATE {t} SET {p} = ?2 || substr({p}, length(?1) + 1) WHERE {}",
                under(p)
            ),
            rekey_subtree: format!(
                "UPDATE {t} SET {k} = ?2 || substr({k}, length(?1) + 1) WHERE {}",
                under(k)
            ),
            set_parent: format!("UPDATE {t} SET {p} = ?2 WHERE {k} = ?1"),
        })
    }
}

/// Relational backend over one SQLite session.
///
/// The session is shared by every caller of this connector and serialized
/// by a mutex.
#[derive(Debug)]
pub struct SqlBackend {
    conn: Mutex<Connection>,
    queries: Queries,
}

impl SqlBackend {
    /// Open the configured database.
    pub fn open(config: &SqlConfig) -> FarwelResult<Self> {
        let queries = Queries::new(config)?;
        let conn = Connection::open(&config.path)?;
        if config.create_table {
            conn.execute_batch(&queries.schema)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            queries,
        })
    }

    /// Private in-memory database with the default schema (for testing).
    pub fn in_memory() -> FarwelResult<Self> {
        Self::open(&SqlConfig::default())
    }

    fn count(conn: &Connection, sql: &str, key: &str) -> FarwelResult<i64> {
        Ok(conn.query_row(sql, params![key], |row| row.get(0))?)
    }
}

impl Backend for SqlBackend {
    fn exists(&self, path: &str) -> FarwelResult<bool> {
        Ok(Self::count(&self.conn.lock(), &self.queries.exists, path)? > 0)
    }

    fn create(&self, path: &str, _mode: u32) -> FarwelResult<()> {
        self.conn
            .lock()
            .execute(&self.queries.insert, params![path, path::parent(path)])?;
        Ok(())
    }

    fn truncate(&self, path: &str) -> FarwelResult<()> {
        match self.conn.lock().execute(&self.queries.truncate, params![path])? {
            0 => Err(FarwelError::not_found(path)),
            _ => Ok(()),
        }
    }

    fn read(&self, file: &FileNode, buf: &mut [u8]) -> FarwelResult<usize> {
        let value: Vec<u8> = self
            .conn
            .lock()
            .query_row(&self.queries.select, params![file.path], |row| row.get(0))
            .optional()?
            .ok_or_else(|| FarwelError::not_found(&file.path))?;

        let start = usize::try_from(file.offset).unwrap_or(usize::MAX).min(value.len());
        let n = buf.len().min(value.len() - start);
        buf[..n].copy_from_slice(&value[start..start + n]);
        Ok(n)
    }

    fn write(&self, file: &FileNode, data: &[u8]) -> FarwelResult<usize> {
        let conn = self.conn.lock();
        let mut value: Vec<u8> = conn
            .query_row(&self.queries.select, params![file.path], |row| row.get(0))
            .optional()?
            .ok_or_else(|| FarwelError::not_found(&file.path))?;

        let start =
            usize::try_from(file.offset).map_err(|_| FarwelError::invalid_path(&file.path))?;
        let end = start + data.len();
        if value.len() < end {
            value.resize(end, 0);
        }
        value[start..end].copy_from_slice(data);
        conn.execute(&self.queries.update, params![value, file.path])?;
        Ok(data.len())
    }

    fn list_dir(&self, dir: &str) -> FarwelResult<Vec<DirEntry>> {
        let conn = self.conn.lock();
        if dir != "/" && Self::count(&conn, &self.queries.exists, dir)? == 0 {
            return Err(FarwelError::not_found(dir));
        }
        let mut stmt = conn.prepare(&self.queries.children)?;
        let keys = stmt.query_map(params![dir], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for key in keys {
            entries.push(DirEntry::new(path::file_name(&key?), EntryKind::Unknown));
        }
        Ok(entries)
    }

    /// Deletes the entry and its direct children.
    fn unlink(&self, path: &str) -> FarwelResult<()> {
        match self.conn.lock().execute(&self.queries.delete, params![path])? {
            0 => Err(FarwelError::not_found(path)),
            _ => Ok(()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> FarwelResult<()> {
        if from == to {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if Self::count(&tx, &self.queries.exists, from)? == 0 {
            return Err(FarwelError::not_found(from));
        }
        tx.execute(&self.queries.delete_target, params![to])?;
        tx.execute(&self.queries.reparent_subtree, params![from, to])?;
        tx.execute(&self.queries.rekey_subtree, params![from, to])?;
        tx.execute(&self.queries.set_parent, params![to, path::parent(to)])?;
        tx.commit()?;
        Ok(())
    }

    fn mkdir(&self, path: &str, mode: u32) -> FarwelResult<()> {
        if self.exists(path)? {
            return Err(FarwelError::already_exists(path));
        }
        self.create(path, mode)
    }

    fn rmdir(&self, path: &str) -> FarwelResult<()> {
        self.unlink(path)
    }

    fn file_size(&self, path: &str) -> FarwelResult<u64> {
        let len: Option<i64> = self
            .conn
            .lock()
            .query_row(&self.queries.length, params![path], |row| row.get(0))
            .optional()?;
        len.map(|n| n as u64).ok_or_else(|| FarwelError::not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::OpenFlags;

    fn node(path: &str, offset: u64) -> FileNode {
        let mut node = FileNode::new(1, path, OpenFlags(libc::O_RDWR));
        node.offset = offset;
        node
    }

    #[test]
    fn test_create_write_read() {
        let db = SqlBackend::in_memory().unwrap();
        assert!(!db.exists("/a").unwrap());
        db.create("/a", 0o644).unwrap();
        assert!(db.exists("/a").unwrap());

        db.write(&node("/a", 0), b"hello").unwrap();
        db.write(&node("/a", 5), b" world").unwrap();
        assert_eq!(db.file_size("/a").unwrap(), 11);

        let mut buf = [0u8; 5];
        let n = db.read(&node("/a", 6), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn test_truncate_and_missing() {
        let db = SqlBackend::in_memory().unwrap();
        db.create("/a", 0o644).unwrap();
        db.write(&node("/a", 0), b"xyz").unwrap();
        db.truncate("/a").unwrap();
        assert_eq!(db.file_size("/a").unwrap(), 0);

        assert!(matches!(db.truncate("/b"), Err(FarwelError::NotFound(_))));
        assert!(matches!(db.file_size("/b"), Err(FarwelError::NotFound(_))));
        assert!(db.create("/a", 0o644).is_err());
    }

    #[test]
    fn test_listing_by_parent() {
        let db = SqlBackend::in_memory().unwrap();
        db.mkdir("/d", 0o755).unwrap();
        db.create("/d/one", 0o644).unwrap();
        db.create("/d/two", 0o644).unwrap();
        db.create("/other", 0o644).unwrap();

        let names: Vec<_> = db.list_dir("/d").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(db.list_dir("/").unwrap().len(), 2);
        assert!(db.list_dir("/nope").is_err());
        assert!(matches!(db.mkdir("/d", 0o755), Err(FarwelError::AlreadyExists(_))));
    }

    #[test]
    fn test_rmdir_removes_children() {
        let db = SqlBackend::in_memory().unwrap();
        db.mkdir("/d", 0o755).unwrap();
        db.create("/d/f", 0o644).unwrap();
        db.rmdir("/d").unwrap();
        assert!(!db.exists("/d").unwrap());
        assert!(!db.exists("/d/f").unwrap());
    }

    #[test]
    fn test_rename_subtree() {
        let db = SqlBackend::in_memory().unwrap();
        db.mkdir("/src", 0o755).unwrap();
        db.create("/src/f", 0o644).unwrap();
        db.write(&node("/src/f", 0), b"abc").unwrap();
        db.rename("/src", "/dst").unwrap();

        assert!(!db.exists("/src/f").unwrap());
        assert_eq!(db.file_size("/dst/f").unwrap(), 3);
        let names: Vec<_> = db.list_dir("/dst").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["f"]);
        assert!(matches!(db.rename("/gone", "/x"), Err(FarwelError::NotFound(_))));
    }

    #[test]
    fn test_file_database_and_custom_columns() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SqlConfig {
            path: tmp.path().join("store.db").to_str().unwrap().to_string(),
            table_name: "blobs".into(),
            key_column: "name".into(),
            value_column: "body".into(),
            parent_column: "dir".into(),
            create_table: true,
        };
        {
            let db = SqlBackend::open(&config).unwrap();
            db.create("/k", 0o644).unwrap();
            db.write(&node("/k", 0), b"persist").unwrap();
        }
        let db = SqlBackend::open(&config).unwrap();
        assert_eq!(db.file_size("/k").unwrap(), 7);
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let config = SqlConfig {
            table_name: "files; DROP TABLE x".into(),
            ..SqlConfig::default()
        };
        assert!(SqlBackend::open(&config).is_err());
    }
}
