//! Building a routing table from a configuration file.

mod common;

use std::ffi::CString;
use std::io::Write;
use std::sync::Arc;

use common::RecordingOs;
use farwel_kernel::{ConfigError, Dispatcher, Interceptor, LibcOs, RealOs};

fn write_config(dir: &tempfile::TempDir, text: &str) -> std::path::PathBuf {
    let path = dir.path().join("farwel.json");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(text.as_bytes()).unwrap();
    path
}

#[test]
fn test_routes_follow_document_order() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tmp.path().join("store.db");
    let path = write_config(
        &tmp,
        &format!(
            r#"{{
                "log": {{ "level": "warn", "sinks": ["stderr"] }},
                "connectors": {{
                    "db":  {{ "type": "sqldb", "path": "{}" }},
                    "mem": {{ "type": "memory" }},
                    "sink": {{ "type": "dummy" }}
                }},
                "locations": {{
                    "regexp://^/data/db/": {{ "connector": "db" }},
                    "regexp://^/data/":    {{ "connector": "mem" }},
                    "regexp://^/dev/null/": {{ "connector": "sink" }}
                }}
            }}"#,
            db.display()
        ),
    );

    let d = Dispatcher::from_path(Arc::new(RecordingOs::default()), &path).unwrap();
    let rules: Vec<_> = d.routes().iter().map(|l| l.rule.as_str()).collect();
    assert_eq!(rules, vec!["regexp://^/data/db/", "regexp://^/data/", "regexp://^/dev/null/"]);
    assert_eq!(d.resolve_by_path("/data/db/t").unwrap().name(), "db");
    assert_eq!(d.resolve_by_path("/data/t").unwrap().name(), "mem");
    assert!(d.resolve_by_path("/home/t").is_none());
}

#[test]
fn test_bad_rule_is_skipped_without_aborting() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_config(
        &tmp,
        r#"{
            "connectors": { "mem": { "type": "memory" } },
            "locations": {
                "no separator here": { "connector": "mem" },
                "regexp://^/after/": { "connector": "mem" }
            }
        }"#,
    );
    let d = Dispatcher::from_path(Arc::new(RecordingOs::default()), &path).unwrap();
    assert_eq!(d.routes().len(), 1);
    assert!(d.resolve_by_path("/after/x").is_some());
}

#[test]
fn test_unparseable_file_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_config(&tmp, "{ \"connectors\": ");
    let err = Dispatcher::from_path(Arc::new(RecordingOs::default()), &path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_sqldb_through_the_call_surface() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tmp.path().join("files.db");
    let path = write_config(
        &tmp,
        &format!(
            r#"{{
                "connectors": {{
                    "db": {{ "type": "sqldb", "conn_str": "{}", "table_name": "entries" }}
                }},
                "locations": {{ "regexp://^/db/": {{ "connector": "db" }} }}
            }}"#,
            db.display()
        ),
    );
    let real: Arc<dyn RealOs> = Arc::new(LibcOs::resolve());
    let i = Interceptor::new(Dispatcher::from_path(Arc::clone(&real), &path).unwrap(), real);
    let c = |s: &str| CString::new(s).unwrap();

    assert_eq!(i.mkdir(&c("/db/dir"), 0o755), 0);
    let fd = i.creat(&c("/db/dir/note"), 0o644);
    assert!(fd > 0);
    assert_eq!(i.write(fd, b"stored in sqlite"), 16);
    assert_eq!(i.close(fd), 0);

    let fd = i.open(&c("/db/dir/note"), libc::O_RDONLY, None);
    let mut buf = [0u8; 64];
    assert_eq!(i.read(fd, &mut buf), 16);
    assert_eq!(&buf[..16], b"stored in sqlite");
    assert_eq!(i.close(fd), 0);

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    assert_eq!(i.stat(&c("/db/dir/note"), &mut st), 0);
    assert_eq!(st.st_size, 16);
    assert_eq!(st.st_blocks, 1);

    // The rows landed in the configured file.
    let conn = rusqlite::Connection::open(&db).unwrap();
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
        .unwrap();
    assert_eq!(n, 2);
}

#[test]
fn test_connector_log_node_gets_its_own_sink() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("loud.log");
    let path = write_config(
        &tmp,
        &format!(
            r#"{{
                "log": {{
                    "level": "error",
                    "registered_sinks": {{ "mine": "{}" }},
                    "sinks": ["stderr"]
                }},
                "connectors": {{
                    "loud": {{
                        "type": "memory",
                        "log": {{ "level": "debug", "sinks": ["mine"] }}
                    }},
                    "quiet": {{ "type": "memory" }}
                }},
                "locations": {{
                    "regexp://^/loud/": {{ "connector": "loud" }},
                    "regexp://^/quiet/": {{ "connector": "quiet" }}
                }}
            }}"#,
            log.display()
        ),
    );
    let real: Arc<dyn RealOs> = Arc::new(LibcOs::resolve());
    let i = Interceptor::new(Dispatcher::from_path(Arc::clone(&real), &path).unwrap(), real);
    let c = |s: &str| CString::new(s).unwrap();

    let fd = i.creat(&c("/loud/a"), 0o644);
    assert_eq!(i.close(fd), 0);
    let fd = i.creat(&c("/quiet/b"), 0o644);
    assert_eq!(i.close(fd), 0);

    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.contains("opened"), "{text}");
    assert!(text.contains("/loud/a"), "{text}");
    assert!(!text.contains("/quiet/b"), "{text}");
}

#[test]
fn test_unusable_connector_log_node_keeps_the_connector() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_config(
        &tmp,
        r#"{
            "log": { "registered_sinks": { "bad": "/proc/definitely/not/writable.log" } },
            "connectors": {
                "mem": { "type": "memory", "log": { "level": "trace", "sinks": ["bad"] } }
            },
            "locations": { "regexp://^/m/": { "connector": "mem" } }
        }"#,
    );
    let d = Dispatcher::from_path(Arc::new(RecordingOs::default()), &path).unwrap();
    assert_eq!(d.connectors().len(), 1);
    assert_eq!(d.resolve_by_path("/m/x").unwrap().name(), "mem");
}
