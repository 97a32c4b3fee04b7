//! Per-semaphore vnode state and its VFS-facing wrappers.
//!
//! Ground: `semfs_vnops.c` (`semfs_getvnode`, `semfs_reclaim`, and the
//! per-vnode read/write/stat/creat/remove/lookup ops), re-architected the
//! same way `quill-sfs`'s vnode cache is: the filesystem holds only a
//! `Weak` per semaphore number, and the last strong reference dropping
//! runs [`Drop for SemfsVnodeInner`] to do what `semfs_reclaim` did by
//! hand under the table lock.
use alloc::string::String;
use alloc::sync::Arc;

use kernel::vfs::{DirectoryOps, File, OpenFlags, RegularFileOps, Stat};
use kernel::{KernelError, KResult};

use crate::fs::{Semfs, SEMFS_ROOTDIR};

pub struct SemfsVnodeInner {
    fs: Arc<Semfs>,
    pub semnum: u32,
}

/// Last strong reference gone: mark the semaphore's vnode slot free, and
/// destroy it outright if the directory has already unlinked it. Ground:
/// `semfs_reclaim`'s "drop from the vnode table, then maybe destroy the
/// underlying sem" sequence — the `vn_refcount != 1` race it guards
/// against can't happen here, since `Drop` only runs once the count has
/// already reached zero.
impl Drop for SemfsVnodeInner {
    fn drop(&mut self) {
        self.fs.remove_cached(self.semnum);
        if self.semnum != SEMFS_ROOTDIR {
            let sem = self.fs.get_sem(self.semnum);
            sem.set_has_vnode(false);
            if !sem.linked() {
                self.fs.sem_clear(self.semnum);
            }
        }
    }
}

/// Loads semaphore `semnum` into a cached vnode, or hands back the one
/// already resident. Ground: `semfs_getvnode`.
pub fn load_vnode(fs: &Arc<Semfs>, semnum: u32) -> Arc<SemfsVnodeInner> {
    if let Some(existing) = fs.lookup_cached(semnum) {
        return existing;
    }
    let vnode = Arc::new(SemfsVnodeInner {
        fs: fs.clone(),
        semnum,
    });
    fs.insert_cached(semnum, &vnode);
    if semnum != SEMFS_ROOTDIR {
        fs.get_sem(semnum).set_has_vnode(true);
    }
    vnode
}

pub struct SemfsFile {
    inner: Arc<SemfsVnodeInner>,
}

impl SemfsFile {
    pub fn new(inner: Arc<SemfsVnodeInner>) -> Self {
        SemfsFile { inner }
    }
}

impl RegularFileOps for SemfsFile {
    /// P: `offset` is meaningless (semaphores aren't seekable), only
    /// `buf.len()` matters. Ground: `semfs_read`.
    fn read(&self, _offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let sem = self.inner.fs.get_sem(self.inner.semnum);
        Ok(sem.read(buf.len()))
    }

    /// V: ground: `semfs_write`.
    fn write(&self, _offset: u64, buf: &[u8]) -> KResult<usize> {
        let sem = self.inner.fs.get_sem(self.inner.semnum);
        sem.write(buf.len())
    }

    fn stat(&self) -> KResult<Stat> {
        let sem = self.inner.fs.get_sem(self.inner.semnum);
        Ok(Stat {
            size: sem.count() as u64,
            linkcount: if sem.linked() { 1 } else { 0 },
        })
    }

    fn isseekable(&self) -> bool {
        false
    }

    fn truncate(&self, len: u64) -> KResult<()> {
        if len > u32::MAX as u64 {
            return Err(KernelError::TooBig);
        }
        let sem = self.inner.fs.get_sem(self.inner.semnum);
        sem.truncate(len as u32);
        Ok(())
    }

    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
}

/// The root directory: a flat list of (name, semaphore) pairs.
/// Subdirectories, symlinks, hard links, and rename are all unsupported,
/// ground: `semfs_dirops`'s `vopfail_*_nosys` entries.
pub struct SemfsDir {
    inner: Arc<SemfsVnodeInner>,
}

impl SemfsDir {
    pub fn new(inner: Arc<SemfsVnodeInner>) -> Self {
        SemfsDir { inner }
    }
}

impl DirectoryOps for SemfsDir {
    fn lookup(&self, name: &str) -> KResult<File> {
        if name == "." || name == ".." {
            return Ok(wrap(self.inner.clone(), true));
        }
        let Some((_, semnum)) = self.inner.fs.dir_find(name) else {
            return Err(KernelError::NotFound);
        };
        Ok(wrap(load_vnode(&self.inner.fs, semnum), false))
    }

    fn getdirentry(&self, slot: u32) -> KResult<String> {
        self.inner.fs.dir_entry_name(slot)
    }

    fn creat(&self, name: &str, flags: OpenFlags) -> KResult<File> {
        let excl = flags.contains(OpenFlags::EXCL);
        let vnode = self.inner.fs.creat(name, excl)?;
        Ok(wrap(vnode, false))
    }

    fn remove(&self, name: &str) -> KResult<()> {
        self.inner.fs.remove(name)
    }

    fn rename(&self, _old: &str, _new: &str) -> KResult<()> {
        Err(KernelError::NotSupported)
    }

    fn stat(&self) -> KResult<Stat> {
        Ok(Stat {
            size: self.inner.fs.dir_count() as u64,
            linkcount: 2,
        })
    }

    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
}

pub fn wrap(vnode: Arc<SemfsVnodeInner>, is_dir: bool) -> File {
    if is_dir {
        File::Directory(Arc::new(SemfsDir::new(vnode)))
    } else {
        File::Regular(Arc::new(SemfsFile::new(vnode)))
    }
}
