//! Directory entry scanning, linking, and unlinking.
//!
//! Ground: `original_source/kern/fs/sfs/sfs_dir.c`. SFS directories have no
//! subdirectories, so a directory is just a flat array of fixed-size
//! entries read and written through [`crate::inode::metaio`]; "deleting" an
//! entry overwrites it with the empty sentinel rather than compacting the
//! array, so later lookups need to skip empty slots and appends can reuse
//! the first one they find.
use alloc::string::String;
use alloc::vec::Vec;

use hal::dev::BlockDevice;
use kernel::{KResult, KernelError};
use zerocopy::{AsBytes, FromBytes};

use crate::bitmap::Freemap;
use crate::inode::{metaio, CachedInode};
use crate::layout::{RawDirEntry, SFS_DIRENTRY_SIZE, SFS_NAMELEN, SFS_NOINO};

fn nentries(dir: &CachedInode) -> u32 {
    let size = dir.raw.size as usize;
    assert!(
        size % SFS_DIRENTRY_SIZE == 0,
        "sfs: directory size not a multiple of entry size"
    );
    (size / SFS_DIRENTRY_SIZE) as u32
}

fn read_entry(
    dev: &dyn BlockDevice,
    freemap: &mut Freemap,
    dir: &mut CachedInode,
    slot: u32,
) -> KResult<RawDirEntry> {
    let mut buf = alloc::vec![0u8; SFS_DIRENTRY_SIZE];
    let offset = slot as u64 * SFS_DIRENTRY_SIZE as u64;
    metaio(dev, freemap, dir, offset, &mut buf, false)?;
    Ok(RawDirEntry::read_from(buf.as_slice()).expect("entry-sized buffer"))
}

fn write_entry(
    dev: &dyn BlockDevice,
    freemap: &mut Freemap,
    dir: &mut CachedInode,
    slot: u32,
    entry: &RawDirEntry,
) -> KResult<()> {
    let mut buf: Vec<u8> = entry.as_bytes().to_vec();
    let offset = slot as u64 * SFS_DIRENTRY_SIZE as u64;
    metaio(dev, freemap, dir, offset, &mut buf, true)?;
    Ok(())
}

/// Scans `dir` for `name`, returning its inode number and slot. `ENOENT`
/// if absent.
pub fn findname(
    dev: &dyn BlockDevice,
    freemap: &mut Freemap,
    dir: &mut CachedInode,
    name: &str,
) -> KResult<(u32, u32)> {
    let n = nentries(dir);
    for slot in 0..n {
        let entry = read_entry(dev, freemap, dir, slot)?;
        if entry.is_empty_slot() {
            continue;
        }
        if entry.name_str() == name {
            return Ok((entry.ino, slot));
        }
    }
    Err(KernelError::NotFound)
}

/// Variant of [`findname`] that never fails with `NotFound`, instead
/// returning `None` plus whatever empty slot was seen; used by `link` where
/// "not found" is the success path.
fn findname_opt(
    dev: &dyn BlockDevice,
    freemap: &mut Freemap,
    dir: &mut CachedInode,
    name: &str,
) -> KResult<(Option<u32>, Option<u32>)> {
    let mut empty_slot = None;
    let n = nentries(dir);
    for slot in 0..n {
        let entry = read_entry(dev, freemap, dir, slot)?;
        if entry.is_empty_slot() {
            if empty_slot.is_none() {
                empty_slot = Some(slot);
            }
            continue;
        }
        if entry.name_str() == name {
            return Ok((Some(entry.ino), empty_slot));
        }
    }
    Ok((None, empty_slot))
}

/// Adds a directory entry mapping `name` to `ino`, appending a fresh slot
/// or reusing an emptied one. `EEXIST` if `name` is already present,
/// `ENAMETOOLONG` if it doesn't fit `SFS_NAMELEN`. Returns the slot used.
pub fn link(
    dev: &dyn BlockDevice,
    freemap: &mut Freemap,
    dir: &mut CachedInode,
    name: &str,
    ino: u32,
) -> KResult<u32> {
    if name.len() >= SFS_NAMELEN {
        return Err(KernelError::NameTooLong);
    }
    let (found, empty_slot) = findname_opt(dev, freemap, dir, name)?;
    if found.is_some() {
        return Err(KernelError::Exists);
    }

    let mut entry = RawDirEntry::empty();
    entry.ino = ino;
    assert!(entry.set_name(name), "name length already checked");

    let slot = match empty_slot {
        Some(slot) => slot,
        None => nentries(dir),
    };
    write_entry(dev, freemap, dir, slot, &entry)?;
    Ok(slot)
}

/// Clears the entry at `slot` back to the empty sentinel.
pub fn unlink(
    dev: &dyn BlockDevice,
    freemap: &mut Freemap,
    dir: &mut CachedInode,
    slot: u32,
) -> KResult<()> {
    write_entry(dev, freemap, dir, slot, &RawDirEntry::empty())
}

/// Returns the name stored at `slot`, or `ENOENT` if it's empty or past
/// the end — used to serve `getdirentry`.
pub fn entry_name(
    dev: &dyn BlockDevice,
    freemap: &mut Freemap,
    dir: &mut CachedInode,
    slot: u32,
) -> KResult<String> {
    if slot >= nentries(dir) {
        return Err(KernelError::NotFound);
    }
    let entry = read_entry(dev, freemap, dir, slot)?;
    if entry.is_empty_slot() {
        return Err(KernelError::NotFound);
    }
    Ok(String::from(entry.name_str()))
}

/// `NOINO`-as-zero would collide with a legitimate inode 0, hence the
/// distinct sentinel; re-exported so callers (e.g. `vnode.rs`) don't need
/// to reach into `layout` for it directly.
pub const NOINO: u32 = SFS_NOINO;
