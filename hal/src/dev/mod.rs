//! Device-facing traits: block storage and memory-mapped registers.
pub mod mmio;

use core::fmt;

/// A 512-byte-sector block device, the unit `quill-sfs` is built on.
///
/// Grounded on `simple_fs::keos_binder::Disk` (`read_block`/`write_block`
/// over a fixed sector size), generalized with an explicit error type so
/// callers can distinguish a transient I/O failure (worth retrying, per
/// spec §6.1's block-I/O-with-retry requirement) from an out-of-range
/// access (a bug, never worth retrying).
pub trait BlockDevice: Send + Sync {
    /// Sector size in bytes. SFS is built around 512-byte sectors.
    fn block_size(&self) -> usize;
    /// Total number of addressable blocks.
    fn block_count(&self) -> u32;
    fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<(), IoError>;
    fn write_block(&self, block: u32, buf: &[u8]) -> Result<(), IoError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// A transient failure; the caller may retry.
    Transient,
    /// `block` was outside `0..block_count()`.
    OutOfRange,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Transient => write!(f, "transient device I/O error"),
            IoError::OutOfRange => write!(f, "block index out of range"),
        }
    }
}

#[cfg(any(test, feature = "mem-disk"))]
pub use mem_disk::MemDisk;

#[cfg(any(test, feature = "mem-disk"))]
mod mem_disk {
    //! A RAM-backed [`BlockDevice`] for host tests, with optional fault
    //! injection so retry logic in `quill-sfs` (`sfs_rwblock`'s bounded
    //! retry loop, per `original_source/kern/fs/sfs/sfs_io.c`) can be
    //! exercised without real hardware.
    use super::{BlockDevice, IoError};
    use crate::spinlock::SpinLock;
    use core::sync::atomic::{AtomicU32, Ordering};

    extern crate alloc;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    pub struct MemDisk {
        block_size: usize,
        blocks: Arc<SpinLock<Vec<u8>>>,
        fail_countdown: AtomicU32,
    }

    impl MemDisk {
        pub fn new(block_size: usize, block_count: u32) -> Self {
            MemDisk {
                block_size,
                blocks: Arc::new(SpinLock::new(alloc::vec![
                    0u8;
                    block_size * block_count as usize
                ])),
                fail_countdown: AtomicU32::new(0),
            }
        }

        /// A second handle onto the same backing storage, with its own
        /// independent fault-injection counter. Lets a host test unmount
        /// and "remount" the same volume (spec §8 scenario 1) without a
        /// real persistent disk image: `mount` takes ownership of one
        /// handle, and a later `mount` on another handle sees whatever
        /// the first one wrote.
        pub fn handle(&self) -> MemDisk {
            MemDisk {
                block_size: self.block_size,
                blocks: self.blocks.clone(),
                fail_countdown: AtomicU32::new(0),
            }
        }

        /// The next `n` read/write calls return [`IoError::Transient`].
        pub fn fail_next(&self, n: u32) {
            self.fail_countdown.store(n, Ordering::SeqCst);
        }

        fn maybe_fail(&self) -> Result<(), IoError> {
            let prev = self.fail_countdown.load(Ordering::SeqCst);
            if prev > 0 {
                self.fail_countdown.fetch_sub(1, Ordering::SeqCst);
                return Err(IoError::Transient);
            }
            Ok(())
        }
    }

    impl BlockDevice for MemDisk {
        fn block_size(&self) -> usize {
            self.block_size
        }

        fn block_count(&self) -> u32 {
            let g = self.blocks.lock();
            let n = (g.len() / self.block_size) as u32;
            g.unlock();
            n
        }

        fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<(), IoError> {
            self.maybe_fail()?;
            let off = block as usize * self.block_size;
            let g = self.blocks.lock();
            if off + self.block_size > g.len() {
                g.unlock();
                return Err(IoError::OutOfRange);
            }
            buf[..self.block_size].copy_from_slice(&g[off..off + self.block_size]);
            g.unlock();
            Ok(())
        }

        fn write_block(&self, block: u32, buf: &[u8]) -> Result<(), IoError> {
            self.maybe_fail()?;
            let off = block as usize * self.block_size;
            let mut g = self.blocks.lock();
            if off + self.block_size > g.len() {
                g.unlock();
                return Err(IoError::OutOfRange);
            }
            g[off..off + self.block_size].copy_from_slice(&buf[..self.block_size]);
            g.unlock();
            Ok(())
        }
    }

}
