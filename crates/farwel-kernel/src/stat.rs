//! Synthetic `stat` records for connector-owned paths.

/// Permission bits reported for every virtual entry.
pub const SYNTHETIC_PERMS: libc::mode_t = libc::S_IRUSR
    | libc::S_IWUSR
    | libc::S_IRGRP
    | libc::S_IWGRP
    | libc::S_IROTH
    | libc::S_IWOTH;

/// Mode reported for every virtual entry: regular-file and directory type
/// bits together, read/write for everyone.
pub const SYNTHETIC_MODE: libc::mode_t = libc::S_IFREG | libc::S_IFDIR | SYNTHETIC_PERMS;

/// The fields a connector can vouch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticStat {
    pub size: u64,
    pub block_size: u64,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

impl SyntheticStat {
    /// Record for an entry of `size` bytes, owned by the calling process.
    pub fn new(size: u64, block_size: u64) -> Self {
        // SAFETY: getuid/getgid cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            size,
            block_size,
            uid,
            gid,
        }
    }

    /// `ceil(size / block_size)`; zero when the block size is zero.
    pub fn blocks(&self) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        self.size.div_ceil(self.block_size)
    }

    pub fn mode(&self) -> libc::mode_t {
        SYNTHETIC_MODE
    }

    /// Overwrite `buf` with this record. Fields not listed are zeroed.
    pub fn fill(&self, buf: &mut libc::stat) {
        // SAFETY: libc::stat is plain old data; all-zero is a valid value.
        *buf = unsafe { std::mem::zeroed() };
        buf.st_mode = self.mode();
        buf.st_nlink = 1;
        buf.st_uid = self.uid;
        buf.st_gid = self.gid;
        buf.st_size = self.size as libc::off_t;
        buf.st_blksize = self.block_size as libc::blksize_t;
        buf.st_blocks = self.blocks() as libc::blkcnt_t;
    }
}
