//! Subscriber setup from the `log` configuration node.
//!
//! One `fmt` layer writes to every active sink at once. `FRWL_LOG`, when
//! set, replaces the configured level with a full `EnvFilter` directive.
//!
//! A connector with its own `log` node gets a separate [`Dispatch`] built
//! the same way; its events go there instead of the global subscriber.

use std::path::Path;

use tracing::Dispatch;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

use crate::config::{ConnectorLogConfig, LOG_ENV, LogConfig, LogLevel, SinkTarget};
use crate::error::{ConfigError, ConfigResult};

fn file_appender(path: &Path) -> ConfigResult<RollingFileAppender> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ConfigError::Logging(format!("bad log file {}", path.display())))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .map_err(|e| ConfigError::Logging(format!("{}: {e}", path.display())))
}

/// Fan-out writer over `targets`. `None` when there is nothing to write to.
pub fn sink_writer(targets: &[SinkTarget]) -> ConfigResult<Option<BoxMakeWriter>> {
    let mut writer: Option<BoxMakeWriter> = None;
    for target in targets {
        let next = match target {
            SinkTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
            SinkTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
            SinkTarget::File(path) => BoxMakeWriter::new(file_appender(path)?),
        };
        writer = Some(match writer {
            None => next,
            Some(prev) => BoxMakeWriter::new(prev.and(next)),
        });
    }
    Ok(writer)
}

/// Filter from `FRWL_LOG`, or from the configured level.
pub fn filter(level: LogLevel) -> ConfigResult<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive)
            .map_err(|e| ConfigError::Logging(format!("{LOG_ENV}={directive:?}: {e}"))),
        Err(_) => Ok(EnvFilter::new(level.as_directive())),
    }
}

/// Subscriber for `config`, not installed anywhere. `None` when no sink is
/// active.
pub fn dispatch(config: &LogConfig, filter: EnvFilter) -> ConfigResult<Option<Dispatch>> {
    let Some(writer) = sink_writer(&config.targets().0)? else {
        return Ok(None);
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false));
    Ok(Some(Dispatch::new(subscriber)))
}

/// Dispatch for a connector's own `log` node. The connector's level is
/// taken literally; `FRWL_LOG` only applies when it sets none.
pub fn connector_dispatch(
    global: &LogConfig,
    over: &ConnectorLogConfig,
) -> ConfigResult<Option<Dispatch>> {
    let config = global.overridden(over);
    warn_unknown(&config);
    let env_filter = match over.level {
        Some(level) => EnvFilter::new(level.as_directive()),
        None => filter(config.level)?,
    };
    dispatch(&config, env_filter)
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed; that is not an
/// error, so hosts and tests can call this more than once.
pub fn init(config: &LogConfig) -> ConfigResult<bool> {
    let Some(dispatch) = dispatch(config, filter(config.level)?)? else {
        return Ok(false);
    };
    let installed = tracing::dispatcher::set_global_default(dispatch).is_ok();
    warn_unknown(config);
    Ok(installed)
}

fn warn_unknown(config: &LogConfig) {
    for name in config.targets().1 {
        tracing::warn!(sink = %name, "unknown log sink, skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn test_file_sink_receives_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("farwel.log");
        let writer = sink_writer(&[SinkTarget::File(log.clone())]).unwrap().unwrap();

        let mut w = writer.make_writer();
        w.write_all(b"line\n").unwrap();
        w.flush().unwrap();
        drop(w);

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "line\n");
    }

    #[test]
    fn test_fan_out_to_two_files() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.log");
        let b = tmp.path().join("b.log");
        let writer = sink_writer(&[SinkTarget::File(a.clone()), SinkTarget::File(b.clone())])
            .unwrap()
            .unwrap();

        writer.make_writer().write_all(b"both\n").unwrap();
        assert_eq!(std::fs::read_to_string(a).unwrap(), "both\n");
        assert_eq!(std::fs::read_to_string(b).unwrap(), "both\n");
    }

    #[test]
    fn test_connector_dispatch_writes_at_its_own_level() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("conn.log");
        let mut global = LogConfig {
            level: LogLevel::Error,
            ..LogConfig::default()
        };
        global
            .registered_sinks
            .insert("conn".into(), file.to_str().unwrap().into());
        let over = ConnectorLogConfig {
            level: Some(LogLevel::Debug),
            sinks: vec!["conn".into()],
        };

        let logger = connector_dispatch(&global, &over).unwrap().unwrap();
        tracing::dispatcher::with_default(&logger, || {
            tracing::debug!(fd = 7, "visible");
            tracing::trace!("hidden");
        });

        let text = std::fs::read_to_string(file).unwrap();
        assert!(text.contains("visible"));
        assert!(!text.contains("hidden"));
    }

    #[test]
    fn test_connector_dispatch_bad_sink() {
        let mut global = LogConfig::default();
        global
            .registered_sinks
            .insert("bad".into(), "/proc/definitely/not/writable.log".into());
        let over = ConnectorLogConfig {
            level: None,
            sinks: vec!["bad".into()],
        };
        assert!(matches!(connector_dispatch(&global, &over), Err(ConfigError::Logging(_))));
    }

    #[test]
    fn test_no_targets() {
        assert!(sink_writer(&[]).unwrap().is_none());
    }

    #[test]
    fn test_bad_file_sink() {
        let err = sink_writer(&[SinkTarget::File("/proc/definitely/not/writable.log".into())]);
        assert!(matches!(err, Err(ConfigError::Logging(_))));
    }
}
