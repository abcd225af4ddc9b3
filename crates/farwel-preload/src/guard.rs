//! Per-thread reentrancy guard.
//!
//! The kernel itself reads files, writes logs and allocates. When those
//! calls land back in a shim on the same thread they must go straight to
//! libc instead of through the routing table again.

use std::cell::Cell;

thread_local! {
    static INSIDE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside a shim until dropped.
#[derive(Debug)]
pub(crate) struct Reentry(());

impl Reentry {
    /// `None` when the thread is already inside, or its thread-locals are
    /// gone (late calls during thread teardown).
    pub(crate) fn enter() -> Option<Self> {
        INSIDE
            .try_with(|inside| {
                if inside.replace(true) {
                    None
                } else {
                    Some(Reentry(()))
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for Reentry {
    fn drop(&mut self) {
        let _ = INSIDE.try_with(|inside| inside.set(false));
    }
}
