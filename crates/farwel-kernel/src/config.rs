//! Configuration document.
//!
//! ```json
//! {
//!   "log": {
//!     "level": "info",
//!     "registered_sinks": { "file": "/tmp/farwel.log" },
//!     "sinks": ["stderr", "file"]
//!   },
//!   "connectors": {
//!     "mem": { "type": "memory", "log": { "level": "debug", "sinks": ["file"] } },
//!     "db":  { "type": "sqldb", "path": "/tmp/store.db", "table_name": "files" }
//!   },
//!   "locations": {
//!     "regexp://^/data/db/": { "connector": "db" },
//!     "regexp://^/data/":    { "connector": "mem" }
//!   }
//! }
//! ```
//!
//! Map order is kept: locations are tried in the order they are written
//! unless an entry carries an explicit `priority`.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable naming the configuration document.
pub const CONFIG_ENV: &str = "FRWL_CONFIG_FILE";

/// Environment variable overriding the configured log filter.
pub const LOG_ENV: &str = "FRWL_LOG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FarwelConfig {
    #[serde(default)]
    pub connectors: IndexMap<String, ConnectorConfig>,
    #[serde(default)]
    pub locations: IndexMap<String, LocationConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// One `connectors` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Factory name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Logging override for this connector's events.
    #[serde(default)]
    pub log: Option<ConnectorLogConfig>,
    /// Everything else, handed to the factory.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// One `locations` entry; the rule is the map key.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub connector: String,
    /// Lower values are tried first. Entries without one count as 0.
    #[serde(default)]
    pub priority: Option<i64>,
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    None,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// The `log` node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Sink name -> `stderr`, `stdout` or a file path.
    pub registered_sinks: IndexMap<String, String>,
    /// Active sinks, by name. Empty means `["stdout"]`.
    pub sinks: Vec<String>,
}

/// A connector's own `log` node. Missing parts inherit from the global one;
/// sink names resolve against the global `registered_sinks`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorLogConfig {
    pub level: Option<LogLevel>,
    pub sinks: Vec<String>,
}

/// Where a sink writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl LogConfig {
    /// Resolve active sink names to targets. `stdout` and `stderr` are
    /// always registered. Unknown names are returned separately.
    pub fn targets(&self) -> (Vec<SinkTarget>, Vec<String>) {
        let default = ["stdout".to_string()];
        let active: &[String] = if self.sinks.is_empty() { &default } else { &self.sinks };

        let mut targets = Vec::new();
        let mut unknown = Vec::new();
        for name in active {
            let target = match self.registered_sinks.get(name).map(String::as_str) {
                Some("stdout") => SinkTarget::Stdout,
                Some("stderr") => SinkTarget::Stderr,
                Some(file) => SinkTarget::File(PathBuf::from(file)),
                None if name == "stdout" => SinkTarget::Stdout,
                None if name == "stderr" => SinkTarget::Stderr,
                None => {
                    unknown.push(name.clone());
                    continue;
                }
            };
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        (targets, unknown)
    }

    /// Copy of this node with a connector's overrides applied.
    pub fn overridden(&self, over: &ConnectorLogConfig) -> LogConfig {
        let mut log = self.clone();
        if let Some(level) = over.level {
            log.level = level;
        }
        if !over.sinks.is_empty() {
            log.sinks = over.sinks.clone();
        }
        log
    }
}

impl FarwelConfig {
    /// Parse a configuration document.
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Read the file named by `FRWL_CONFIG_FILE`.
    pub fn from_env() -> ConfigResult<Self> {
        let path = std::env::var_os(CONFIG_ENV).ok_or(ConfigError::EnvMissing(CONFIG_ENV))?;
        Self::from_path(path)
    }
}
