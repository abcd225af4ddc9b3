//! Virtual descriptor allocation.
//!
//! Descriptors are issued above a watermark taken from the host's own
//! descriptor ceiling, so a value handed out here can never collide with
//! one the kernel gives the same process. Values are never recycled.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{FarwelError, FarwelResult};

/// Raw descriptor value, as seen by the host process.
pub type Fd = libc::c_int;

/// Identifies the connector that owns a descriptor.
///
/// This is an index into the dispatcher's connector registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectorId(pub(crate) usize);

impl ConnectorId {
    /// Registry index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Used when the host does not expose any descriptor limit.
const FALLBACK_CEILING: i64 = 1 << 20;

/// Leaves half of the `c_int` range for issued descriptors.
const MAX_WATERMARK: i64 = (i32::MAX / 2) as i64;

/// Issues process-unique descriptors and records their owning connector.
#[derive(Debug)]
pub struct DescriptorAllocator {
    watermark: Fd,
    /// Last issued value; starts at the watermark.
    last: AtomicI32,
    owners: DashMap<Fd, ConnectorId>,
}

impl Default for DescriptorAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorAllocator {
    /// Create an allocator whose watermark is the host's descriptor ceiling.
    pub fn new() -> Self {
        Self::with_watermark(host_descriptor_ceiling())
    }

    /// Create an allocator with an explicit watermark.
    ///
    /// Every issued descriptor is strictly greater than `watermark`.
    pub fn with_watermark(watermark: Fd) -> Self {
        Self {
            watermark,
            last: AtomicI32::new(watermark),
            owners: DashMap::new(),
        }
    }

    /// The value all issued descriptors lie above.
    pub fn watermark(&self) -> Fd {
        self.watermark
    }

    /// Issue a fresh descriptor owned by `owner`.
    ///
    /// The owner is registered before the value is returned, so any caller
    /// that can observe the descriptor can also resolve it.
    pub fn allocate(&self, owner: ConnectorId) -> FarwelResult<Fd> {
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map_err(|_| FarwelError::Exhausted)?;
        let fd = prev + 1;
        self.owners.insert(fd, owner);
        Ok(fd)
    }

    /// Drop the registration for `fd` if `owner` holds it.
    ///
    /// Returns `false` and leaves the table alone when the descriptor is
    /// unknown or belongs to someone else.
    pub fn release(&self, fd: Fd, owner: ConnectorId) -> bool {
        self.owners.remove_if(&fd, |_, held| *held == owner).is_some()
    }

    /// Find the connector owning `fd`.
    ///
    /// `None` means the descriptor is not ours: either a real OS descriptor
    /// below the watermark or one that was never issued or already released.
    pub fn resolve(&self, fd: Fd) -> Option<ConnectorId> {
        if fd <= self.watermark {
            return None;
        }
        self.owners.get(&fd).map(|entry| *entry.value())
    }

    /// Number of live registrations.
    pub fn live(&self) -> usize {
        self.owners.len()
    }
}

/// Highest descriptor value the host may hand out, clamped to a usable range.
///
/// Takes the largest of `fs.file-max`, `fs.nr_open` and the hard
/// `RLIMIT_NOFILE`. Modern kernels report `file-max` as `LONG_MAX`, which the
/// clamp folds back into `c_int` space.
pub fn host_descriptor_ceiling() -> Fd {
    let sysctl = |name: &str| -> Option<i64> {
        std::fs::read_to_string(format!("/proc/sys/fs/{name}"))
            .ok()?
            .trim()
            .parse()
            .ok()
    };

    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, writable rlimit.
    let hard = if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } == 0
        && limit.rlim_max != libc::RLIM_INFINITY
    {
        i64::try_from(limit.rlim_max).ok()
    } else {
        None
    };

    [sysctl("file-max"), sysctl("nr_open"), hard]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(FALLBACK_CEILING)
        .clamp(1, MAX_WATERMARK) as Fd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    const A: ConnectorId = ConnectorId(0);
    const B: ConnectorId = ConnectorId(1);

    #[test]
    fn test_issues_above_watermark() {
        let alloc = DescriptorAllocator::with_watermark(1000);
        let fd = alloc.allocate(A).unwrap();
        assert!(fd > 1000);
        assert_eq!(alloc.resolve(fd), Some(A));
    }

    #[test]
    fn test_host_watermark_exceeds_open_descriptors() {
        let alloc = DescriptorAllocator::new();
        // stdin/stdout/stderr and anything the test harness holds.
        assert!(alloc.watermark() > 2);
        assert_eq!(alloc.resolve(0), None);
        assert_eq!(alloc.resolve(2), None);
    }

    #[test]
    fn test_release_checks_owner() {
        let alloc = DescriptorAllocator::with_watermark(10);
        let fd = alloc.allocate(A).unwrap();

        assert!(!alloc.release(fd, B));
        assert_eq!(alloc.resolve(fd), Some(A));

        assert!(alloc.release(fd, A));
        assert_eq!(alloc.resolve(fd), None);
        assert!(!alloc.release(fd, A));
    }

    #[test]
    fn test_never_recycles() {
        let alloc = DescriptorAllocator::with_watermark(10);
        let first = alloc.allocate(A).unwrap();
        assert!(alloc.release(first, A));
        let second = alloc.allocate(A).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_below_watermark_is_never_resolved() {
        let alloc = DescriptorAllocator::with_watermark(10);
        alloc.owners.insert(5, A);
        assert_eq!(alloc.resolve(5), None);
    }

    #[test]
    fn test_exhaustion() {
        let alloc = DescriptorAllocator::with_watermark(i32::MAX - 1);
        assert_eq!(alloc.allocate(A).unwrap(), i32::MAX);
        assert!(matches!(alloc.allocate(A), Err(FarwelError::Exhausted)));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let alloc = Arc::new(DescriptorAllocator::with_watermark(100));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    (0..500)
                        .map(|_| alloc.allocate(ConnectorId(i)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for fd in h.join().unwrap() {
                assert!(fd > 100);
                assert!(seen.insert(fd), "duplicate descriptor {fd}");
            }
        }
        assert_eq!(alloc.live(), 4000);
    }
}
