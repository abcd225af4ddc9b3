//! Several host threads calling into one dispatcher.

mod common;

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::Arc;
use std::thread;

use common::{RecordingOs, dispatcher};
use farwel_kernel::connector::MemoryBackend;
use farwel_kernel::Interceptor;

fn shared() -> Arc<Interceptor> {
    let real = Arc::new(RecordingOs::default());
    let mut d = dispatcher(Arc::clone(&real));
    d.add_connector("a", Box::new(MemoryBackend::new())).unwrap();
    d.add_connector("b", Box::new(MemoryBackend::new())).unwrap();
    d.add_location("regexp://^/a/", "a", 0).unwrap();
    d.add_location("regexp://^/", "b", 0).unwrap();
    Arc::new(Interceptor::new(d, real))
}

#[test]
fn test_parallel_open_write_close() {
    let i = shared();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let i = Arc::clone(&i);
            thread::spawn(move || {
                let mut fds = Vec::new();
                for n in 0..50 {
                    let root = if n % 2 == 0 { "a" } else { "b" };
                    let path = CString::new(format!("/{root}/t{t}-{n}")).unwrap();
                    let fd = i.creat(&path, 0o644);
                    assert!(fd > 10_000);
                    let data = format!("{t}:{n}");
                    assert_eq!(i.write(fd, data.as_bytes()), data.len() as isize);
                    fds.push(fd);
                }
                for fd in &fds {
                    assert_eq!(i.close(*fd), 0);
                }
                fds
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for h in handles {
        for fd in h.join().unwrap() {
            assert!(seen.insert(fd));
        }
    }
    assert_eq!(seen.len(), 400);
    assert_eq!(i.dispatcher().allocator().live(), 0);
    for c in i.dispatcher().connectors() {
        assert_eq!(c.open_count(), 0);
    }
}

#[test]
fn test_routing_is_deterministic_across_threads() {
    let i = shared();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let i = Arc::clone(&i);
            thread::spawn(move || {
                (0..200)
                    .map(|n| {
                        let path = if n % 3 == 0 { "/a/x" } else { "/b/x" };
                        (path, i.dispatcher().resolve_by_path(path).unwrap().name().to_string())
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for h in handles {
        for (path, name) in h.join().unwrap() {
            let expected = if path == "/a/x" { "a" } else { "b" };
            assert_eq!(name, expected);
        }
    }
}
