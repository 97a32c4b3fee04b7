//! Raw block read/write with bounded retry.
//!
//! Ground: `original_source/kern/fs/sfs/sfs_io.c`'s `sfs_rwblock`, which
//! retries a transient I/O failure up to ten total attempts before giving
//! up with `EIO`. Generalized against [`hal::dev::BlockDevice`]'s two-way
//! `IoError` split (`Transient` vs `OutOfRange`) rather than OS/161's single
//! `errno` return: a transient failure is retried, an out-of-range access
//! is a caller bug and panics immediately, mirroring the original's
//! `KASSERT`-on-`EINVAL` treatment of a bad block number.
use hal::dev::{BlockDevice, IoError};
use kernel::{KResult, KernelError};

use crate::bitmap::Freemap;
use crate::layout::SFS_BLOCKSIZE;

const MAX_RWBLOCK_TRIES: u32 = 10;

fn rwblock(mut op: impl FnMut() -> Result<(), IoError>) -> KResult<()> {
    let mut tries = 0;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(IoError::OutOfRange) => {
                panic!("sfs: block index out of range");
            }
            Err(IoError::Transient) => {
                tries += 1;
                if tries >= MAX_RWBLOCK_TRIES {
                    return Err(KernelError::Io);
                }
            }
        }
    }
}

/// Reads exactly `buf.len()` bytes (normally one `SFS_BLOCKSIZE` block)
/// starting at `block`, retrying transient failures.
pub fn read_block(dev: &dyn BlockDevice, block: u32, buf: &mut [u8]) -> KResult<()> {
    rwblock(|| dev.read_block(block, buf))
}

/// Writes exactly `buf.len()` bytes to `block`, retrying transient
/// failures.
pub fn write_block(dev: &dyn BlockDevice, block: u32, buf: &[u8]) -> KResult<()> {
    rwblock(|| dev.write_block(block, buf))
}

/// Allocates a block and zeroes its on-disk contents, so neither a sparse
/// read nor a crash ever exposes a previous tenant's data. Mirrors
/// `sfs_balloc`, used both for data blocks (`inode::bmap`) and for whole
/// inodes (`vnode::make_obj` — each inode occupies one block, so "allocate
/// an inode" and "allocate a data block" are the same bitmap operation).
/// If the clear fails the bit is unmarked rather than left
/// allocated-but-unusable.
pub fn alloc_cleared_block(dev: &dyn BlockDevice, freemap: &mut Freemap) -> KResult<u32> {
    let block = freemap.balloc()?;
    let zeros = [0u8; SFS_BLOCKSIZE];
    if let Err(e) = write_block(dev, block, &zeros) {
        freemap.bfree(block);
        return Err(e);
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::dev::MemDisk;

    #[test]
    fn transient_failures_retry_then_succeed() {
        hal::cpu::test_support::ensure_platform();
        let dev = MemDisk::new(512, 4);
        dev.fail_next(5);
        let mut buf = [0u8; 512];
        assert!(read_block(&dev, 0, &mut buf).is_ok());
    }

    #[test]
    fn exhausting_retries_is_eio() {
        hal::cpu::test_support::ensure_platform();
        let dev = MemDisk::new(512, 4);
        dev.fail_next(MAX_RWBLOCK_TRIES);
        let mut buf = [0u8; 512];
        assert_eq!(read_block(&dev, 0, &mut buf), Err(KernelError::Io));
    }
}
