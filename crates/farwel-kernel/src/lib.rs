//! farwel kernel: routes intercepted file I/O to pluggable connectors.
//!
//! The pieces, leaf first:
//!
//! - [`descriptor`]: issues descriptors above the host's own range
//! - [`node`]: open file and directory handles
//! - [`connector`]: the backend contract and the built-in backends
//! - [`comparer`]: path predicates used by routes
//! - [`dispatcher`]: connector registry and ordered route list
//! - [`surface`]: POSIX-shaped entry points with fall-through to [`real`]
//!
//! The C ABI shim lives in the `farwel-preload` crate; everything here is
//! usable (and tested) without being preloaded.

pub mod comparer;
pub mod config;
pub mod connector;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod node;
pub mod path;
pub mod real;
pub mod stat;
pub mod surface;

pub use comparer::{Comparer, ComparerFactory, ComparerRegistry};
pub use config::{CONFIG_ENV, ConnectorLogConfig, FarwelConfig, LogConfig, LogLevel};
pub use connector::{Backend, Connector, ConnectorFactory, ConnectorRegistry, FactoryContext};
pub use descriptor::{ConnectorId, DescriptorAllocator, Fd};
pub use dispatcher::{Dispatcher, LoadReport, Location};
pub use error::{ConfigError, ConfigResult, FarwelError, FarwelResult};
pub use node::{DirEntry, DirRecord, DirectoryNode, EntryKind, FileNode, OpenFlags};
pub use real::{LibcOs, RealOs};
pub use stat::SyntheticStat;
pub use surface::Interceptor;
