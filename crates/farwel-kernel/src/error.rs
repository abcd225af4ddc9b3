//! Error types.
//!
//! `FarwelError` is what connectors and backends return; the call surface
//! turns it into an `errno` value. `ConfigError` only exists during
//! initialization and is fatal to the host process.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Per-call error type.
#[derive(Debug, Error)]
pub enum FarwelError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Backend refused a create or truncate.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The backend does not implement the operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Rename between two different connectors.
    #[error("cross-connector rename: {from} -> {to}")]
    CrossConnector { from: String, to: String },

    /// Descriptor is not open (or not open for this operation).
    #[error("bad descriptor: {0}")]
    BadDescriptor(i32),

    /// Descriptor counter ran out of room.
    #[error("descriptor space exhausted")]
    Exhausted,

    /// Invalid path or argument.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Argument a virtual descriptor cannot honor.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Storage-level failure inside a backend.
    #[error("backend failure: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FarwelError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an AccessDenied error.
    pub fn access_denied(path: impl Into<String>) -> Self {
        Self::AccessDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a Backend error.
    pub fn backend(msg: impl ToString) -> Self {
        Self::Backend(msg.to_string())
    }

    /// The `errno` value reported at the call surface.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::AccessDenied(_) => libc::EACCES,
            Self::Unsupported(_) => libc::ENOSYS,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::IsADirectory(_) => libc::EISDIR,
            Self::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            Self::CrossConnector { .. } => libc::EXDEV,
            Self::BadDescriptor(_) => libc::EBADF,
            Self::Exhausted => libc::EMFILE,
            Self::InvalidPath(_) | Self::InvalidArgument(_) => libc::EINVAL,
            Self::Backend(_) => libc::EIO,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Whether this error reflects a storage fault rather than an ordinary
    /// POSIX outcome. Faults are logged at `error` level.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Io(_) | Self::Exhausted)
    }
}

impl From<rusqlite::Error> for FarwelError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Convert FarwelError to std::io::Error for callers outside the interposer.
impl From<FarwelError> for io::Error {
    fn from(e: FarwelError) -> Self {
        match e {
            FarwelError::Io(e) => e,
            other => io::Error::from_raw_os_error(other.errno()),
        }
    }
}

/// Result type for connector and backend operations.
pub type FarwelResult<T> = Result<T, FarwelError>;

/// Fatal initialization error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is not set.
    #[error("Config file is not set. Set env param {0}")]
    EnvMissing(&'static str),

    /// Configuration document could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration document is not valid.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Log sinks could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Result type for initialization.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FarwelError::not_found("/x").errno(), libc::ENOENT);
        assert_eq!(FarwelError::already_exists("/x").errno(), libc::EEXIST);
        assert_eq!(FarwelError::access_denied("/x").errno(), libc::EACCES);
        assert_eq!(FarwelError::BadDescriptor(3).errno(), libc::EBADF);
        assert_eq!(
            FarwelError::CrossConnector {
                from: "/a".into(),
                to: "/b".into()
            }
            .errno(),
            libc::EXDEV
        );
        assert_eq!(FarwelError::backend("db gone").errno(), libc::EIO);
    }

    #[test]
    fn test_io_error_keeps_raw_code() {
        let err = FarwelError::from(io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.errno(), libc::ENOSPC);
        let io: io::Error = FarwelError::not_found("/x").into();
        assert_eq!(io.raw_os_error(), Some(libc::ENOENT));
    }
}
