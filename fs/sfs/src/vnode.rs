//! Per-inode vnode state and its VFS-facing wrappers.
//!
//! Ground: `original_source/kern/fs/sfs/sfs_inode.c` (`sfs_loadvnode`,
//! `sfs_makeobj`, `sfs_reclaim`) and `sfs_vnops.c` (the per-vnode
//! read/write/stat/creat/remove/rename operations), re-architected per
//! spec's reference-counted-vnode-cache redesign flag: the original keeps
//! a `vnodearray` of every loaded vnode plus a manual refcount, and
//! `sfs_reclaim` is called explicitly by the VFS layer when that count
//! drops to one, racing `sfs_loadvnode` unless both take the filesystem's
//! biglock. Here the filesystem's cache holds only a `Weak` per inode;
//! every live `File::Regular`/`File::Directory` holds a strong `Arc`, and
//! the very last one dropping runs [`Drop for SfsVnodeInner`] to do what
//! `sfs_reclaim` did by hand. There is no separate "decide to reclaim,
//! then race to reclaim" window because Rust's reference count *is* the
//! decision.
use alloc::string::String;
use alloc::sync::{Arc, Weak};

use hal::dev::BlockDevice;
use hal::spinlock::SpinLock;
use kernel::vfs::{DirectoryOps, File, OpenFlags, RegularFileOps, Stat};
use kernel::{KResult, KernelError};

use crate::dir;
use crate::fs::Sfs;
use crate::inode::CachedInode;
use crate::layout::{SFS_TYPE_DIR, SFS_TYPE_FILE, SFS_TYPE_INVAL};

pub struct SfsVnodeInner {
    fs: Weak<Sfs>,
    pub ino: u32,
    pub inode: SpinLock<CachedInode>,
}

impl SfsVnodeInner {
    pub fn itype(&self) -> u16 {
        let g = self.inode.lock();
        let t = g.raw.itype;
        g.unlock();
        t
    }

    fn stat(&self) -> Stat {
        let g = self.inode.lock();
        let stat = Stat {
            size: g.raw.size as u64,
            linkcount: g.raw.linkcount as u32,
        };
        g.unlock();
        stat
    }

    fn fsync(&self) -> KResult<()> {
        let Some(fs) = self.fs.upgrade() else {
            return Ok(());
        };
        let mut g = self.inode.lock();
        let r = fs.sync_inode(&mut g);
        g.unlock();
        r
    }
}

/// Last strong reference gone: flush a dirty inode, and if the on-disk
/// link count is already zero (the file was `remove`d while still open),
/// truncate it to nothing and return its block to the freemap. Ground:
/// `sfs_reclaim`'s "if there are no on-disk references either, erase it"
/// branch — the `vn_refcount != 1` race it guards against can't happen
/// here, since `Drop` only runs once the count has already reached zero.
impl Drop for SfsVnodeInner {
    fn drop(&mut self) {
        let Some(fs) = self.fs.upgrade() else {
            return;
        };
        let mut g = self.inode.lock();
        if g.raw.linkcount == 0 {
            let _ = fs.itrunc_locked(&mut g, 0);
            fs.free_inode_block(self.ino);
        }
        let _ = fs.sync_inode(&mut g);
        g.unlock();
    }
}

/// Loads inode `ino` into a cached vnode, or hands back the one already
/// resident. `force_type` mirrors the original's `forcetype` parameter:
/// `Some(t)` means the block was just allocated by [`make_obj`] and is
/// still zeroed (`SFS_TYPE_INVAL` on disk), so the loaded inode's type is
/// set to `t`; `None` means an existing object is being looked up and its
/// on-disk type must already be `FILE` or `DIR`.
pub fn load_vnode(fs: &Arc<Sfs>, ino: u32, force_type: Option<u16>) -> KResult<Arc<SfsVnodeInner>> {
    if let Some(existing) = fs.lookup_cached(ino) {
        return Ok(existing);
    }

    fs.assert_block_allocated(ino);
    let mut raw = fs.read_inode_block(ino)?;

    let mut dirty = false;
    if let Some(t) = force_type {
        assert_eq!(
            raw.itype, SFS_TYPE_INVAL,
            "sfs: loadvnode: forcetype given but on-disk inode {} is not fresh",
            ino
        );
        raw.itype = t;
        dirty = true;
    } else {
        assert!(
            raw.itype == SFS_TYPE_FILE || raw.itype == SFS_TYPE_DIR,
            "sfs: loadvnode: invalid inode type (inode {}, type {})",
            ino,
            raw.itype
        );
    }

    let mut cached = CachedInode::new(ino, raw);
    cached.dirty = dirty;

    let vnode = Arc::new(SfsVnodeInner {
        fs: Arc::downgrade(fs),
        ino,
        inode: SpinLock::new(cached),
    });
    fs.insert_cached(ino, &vnode);
    Ok(vnode)
}

/// Allocates a fresh inode block and loads it as a new vnode of `itype`.
pub fn make_obj(fs: &Arc<Sfs>, itype: u16) -> KResult<Arc<SfsVnodeInner>> {
    let ino = fs.alloc_inode_block()?;
    match load_vnode(fs, ino, Some(itype)) {
        Ok(v) => Ok(v),
        Err(e) => {
            fs.free_inode_block(ino);
            Err(e)
        }
    }
}

/// A regular file, wrapping the shared cached vnode.
pub struct SfsFile {
    fs: Arc<Sfs>,
    pub inner: Arc<SfsVnodeInner>,
}

impl SfsFile {
    pub fn new(fs: Arc<Sfs>, inner: Arc<SfsVnodeInner>) -> Self {
        SfsFile { fs, inner }
    }
}

impl RegularFileOps for SfsFile {
    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let mut tmp = buf.to_vec();
        let mut g = self.inner.inode.lock();
        let r = self.fs.io_locked(&mut g, offset, &mut tmp, false);
        g.unlock();
        let n = r?;
        buf[..n].copy_from_slice(&tmp[..n]);
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        let mut tmp = buf.to_vec();
        let mut g = self.inner.inode.lock();
        let r = self.fs.io_locked(&mut g, offset, &mut tmp, true);
        g.unlock();
        r
    }

    fn stat(&self) -> KResult<Stat> {
        Ok(self.inner.stat())
    }

    fn fsync(&self) -> KResult<()> {
        self.inner.fsync()
    }

    fn truncate(&self, len: u64) -> KResult<()> {
        let mut g = self.inner.inode.lock();
        let r = self.fs.itrunc_locked(&mut g, len as u32);
        g.unlock();
        r
    }

    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }

    fn downcast_ino(&self) -> Option<u32> {
        Some(self.inner.ino)
    }
}

/// The root (and, in this single-level filesystem, only) directory.
pub struct SfsDir {
    fs: Arc<Sfs>,
    pub inner: Arc<SfsVnodeInner>,
}

impl SfsDir {
    pub fn new(fs: Arc<Sfs>, inner: Arc<SfsVnodeInner>) -> Self {
        SfsDir { fs, inner }
    }

    /// Ground: `sfs_lookonce` — `findname` plus `loadvnode`, panicking if
    /// the found inode's on-disk link count is already zero (a crash-
    /// consistency invariant the original asserts too).
    fn lookonce(&self, name: &str) -> KResult<(Arc<SfsVnodeInner>, u32)> {
        let (ino, slot) = {
            let mut g = self.inner.inode.lock();
            let r = self.fs.dir_findname(&mut g, name);
            g.unlock();
            r?
        };
        let vnode = load_vnode(&self.fs, ino, None)?;
        assert_ne!(
            vnode.itype(),
            SFS_TYPE_INVAL,
            "sfs: lookonce: loaded invalid inode"
        );
        Ok((vnode, slot))
    }
}

impl DirectoryOps for SfsDir {
    fn lookup(&self, name: &str) -> KResult<File> {
        let (vnode, _slot) = self.lookonce(name)?;
        Ok(wrap(self.fs.clone(), vnode))
    }

    fn getdirentry(&self, slot: u32) -> KResult<String> {
        let mut g = self.inner.inode.lock();
        let r = self.fs.dir_entry_name(&mut g, slot);
        g.unlock();
        r
    }

    fn creat(&self, name: &str, flags: OpenFlags) -> KResult<File> {
        let existing = {
            let mut g = self.inner.inode.lock();
            let r = self.fs.dir_findname(&mut g, name);
            g.unlock();
            r
        };

        match existing {
            Ok((ino, _slot)) => {
                if flags.contains(OpenFlags::EXCL) {
                    return Err(KernelError::Exists);
                }
                let vnode = load_vnode(&self.fs, ino, None)?;
                Ok(wrap(self.fs.clone(), vnode))
            }
            Err(KernelError::NotFound) => {
                let newguy = make_obj(&self.fs, SFS_TYPE_FILE)?;
                {
                    let mut dirguard = self.inner.inode.lock();
                    let link_result = self.fs.dir_link(&mut dirguard, name, newguy.ino);
                    dirguard.unlock();
                    if let Err(e) = link_result {
                        return Err(e);
                    }
                }
                {
                    let mut g = newguy.inode.lock();
                    g.raw.linkcount += 1;
                    g.dirty = true;
                    g.unlock();
                }
                Ok(wrap(self.fs.clone(), newguy))
            }
            Err(e) => Err(e),
        }
    }

    fn link(&self, name: &str, target: &Arc<dyn RegularFileOps>) -> KResult<()> {
        let Some(ino) = target.downcast_ino() else {
            return Err(KernelError::Invalid);
        };
        let Some(vnode) = self.fs.lookup_cached(ino) else {
            return Err(KernelError::Invalid);
        };
        let mut dirguard = self.inner.inode.lock();
        let r = self.fs.dir_link(&mut dirguard, name, ino);
        dirguard.unlock();
        r?;
        let mut g = vnode.inode.lock();
        g.raw.linkcount += 1;
        g.dirty = true;
        g.unlock();
        Ok(())
    }

    fn remove(&self, name: &str) -> KResult<()> {
        let (victim, slot) = self.lookonce(name)?;
        let mut dirguard = self.inner.inode.lock();
        let r = self.fs.dir_unlink(&mut dirguard, slot);
        dirguard.unlock();
        r?;
        let mut g = victim.inode.lock();
        assert!(g.raw.linkcount > 0, "sfs: remove: linkcount already zero");
        g.raw.linkcount -= 1;
        g.dirty = true;
        g.unlock();
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> KResult<()> {
        let (victim, old_slot) = self.lookonce(old)?;
        assert_eq!(
            victim.itype(),
            SFS_TYPE_FILE,
            "sfs: rename: subdirectories are not supported"
        );

        let new_slot = {
            let mut dirguard = self.inner.inode.lock();
            let r = self.fs.dir_link(&mut dirguard, new, victim.ino);
            dirguard.unlock();
            r?
        };

        {
            let mut g = victim.inode.lock();
            g.raw.linkcount += 1;
            g.dirty = true;
            g.unlock();
        }

        let mut dirguard = self.inner.inode.lock();
        let unlink_result = self.fs.dir_unlink(&mut dirguard, old_slot);
        dirguard.unlock();

        match unlink_result {
            Ok(()) => {
                let mut g = victim.inode.lock();
                g.raw.linkcount -= 1;
                g.dirty = true;
                g.unlock();
                Ok(())
            }
            Err(e) => {
                // Undo the new link; there is no good recovery if this
                // second step also fails, matching the original's
                // "cannot recover" panic.
                let mut dirguard = self.inner.inode.lock();
                self.fs
                    .dir_unlink(&mut dirguard, new_slot)
                    .unwrap_or_else(|e2| {
                        panic!("sfs: rename: cannot recover ({:?} then {:?})", e, e2)
                    });
                dirguard.unlock();
                let mut g = victim.inode.lock();
                g.raw.linkcount -= 1;
                g.unlock();
                Err(e)
            }
        }
    }

    fn stat(&self) -> KResult<Stat> {
        Ok(self.inner.stat())
    }

    fn fsync(&self) -> KResult<()> {
        self.inner.fsync()
    }

    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
}

fn wrap(fs: Arc<Sfs>, vnode: Arc<SfsVnodeInner>) -> File {
    match vnode.itype() {
        SFS_TYPE_DIR => File::Directory(Arc::new(SfsDir::new(fs, vnode))),
        SFS_TYPE_FILE => File::Regular(Arc::new(SfsFile::new(fs, vnode))),
        other => panic!("sfs: wrap: invalid inode type {}", other),
    }
}

pub fn wrap_root(fs: Arc<Sfs>, vnode: Arc<SfsVnodeInner>) -> File {
    wrap(fs, vnode)
}
