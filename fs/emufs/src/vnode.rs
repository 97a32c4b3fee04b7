//! Per-handle vnode state and its VFS-facing wrappers.
//!
//! Ground: `emu.c` (`emufs_loadvnode`, `emufs_reclaim`, `emufs_getroot`),
//! cache redesigned the same way `quill-sfs` redesigns its vnode table:
//! the filesystem holds only a `Weak` per handle, and the last strong
//! reference dropping runs [`Drop for EmufsVnodeInner`] to close the
//! hardware handle, which is what `emufs_reclaim` did by hand under the
//! filesystem's lock. The back-reference to the owning filesystem is
//! itself a `Weak<Emufs>`, not a strong one (see [`Emufs::root`]'s
//! doc comment for why that matters for the root handle).
use alloc::string::String;
use alloc::sync::{Arc, Weak};

use kernel::vfs::{DirectoryOps, File, OpenFlags, RegularFileOps, Stat};
use kernel::{KResult, KernelError};

use crate::fs::Emufs;
use crate::ops;
use crate::protocol::EMU_ROOTHANDLE;

pub struct EmufsVnodeInner {
    fs: Weak<Emufs>,
    pub handle: u32,
}

impl EmufsVnodeInner {
    pub(crate) fn new(fs: &Weak<Emufs>, handle: u32) -> Self {
        EmufsVnodeInner {
            fs: fs.clone(),
            handle,
        }
    }
}

/// Last strong reference gone: close the hardware handle, unless it's
/// the well-known root handle. Ground: `emufs_reclaim`, which closes the
/// device handle once a vnode's refcount drops to zero; errors are not
/// actionable here (the handle is going away either way) so they're
/// swallowed, matching the original's `(void)` discard of `emu_close`'s
/// return value on the reclaim path. The root handle is never closed
/// this way in practice — `Emufs` keeps a permanent strong reference to
/// its root vnode (ground: `emufs_addtovfs` pinning `ef_root`), so this
/// `Drop` only ever runs for the root handle if the mount itself is torn
/// down — but the skip is kept explicit so a real device that rejects
/// `EMU_OP_CLOSE` on handle 0 can never panic on an ordinary drop.
impl Drop for EmufsVnodeInner {
    fn drop(&mut self) {
        let Some(fs) = self.fs.upgrade() else {
            return;
        };
        fs.remove_cached(self.handle);
        if self.handle != EMU_ROOTHANDLE {
            let _ = ops::close(fs.transport(), self.handle);
        }
    }
}

/// Loads handle `handle` into a cached vnode, or hands back the one
/// already resident. `is_dir` is only consulted when a fresh vnode is
/// created; ground: `emufs_loadvnode`.
pub fn load_vnode(fs: &Arc<Emufs>, handle: u32, is_dir: bool) -> Arc<EmufsVnodeInner> {
    if handle == EMU_ROOTHANDLE {
        return fs.root().clone();
    }
    if let Some(existing) = fs.lookup_cached(handle) {
        return existing;
    }
    let vnode = Arc::new(EmufsVnodeInner::new(&Arc::downgrade(fs), handle));
    fs.insert_cached(handle, &vnode);
    let _ = is_dir;
    vnode
}

pub struct EmufsFile {
    inner: Arc<EmufsVnodeInner>,
}

impl EmufsFile {
    pub fn new(inner: Arc<EmufsVnodeInner>) -> Self {
        EmufsFile { inner }
    }

    fn fs(&self) -> Arc<Emufs> {
        self.inner
            .fs
            .upgrade()
            .expect("emufs: vnode outlived its filesystem")
    }
}

impl RegularFileOps for EmufsFile {
    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let fs = self.fs();
        ops::read(fs.transport(), self.inner.handle, offset, buf)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        let fs = self.fs();
        ops::write(fs.transport(), self.inner.handle, offset, buf)
    }

    fn stat(&self) -> KResult<Stat> {
        let fs = self.fs();
        let size = ops::getsize(fs.transport(), self.inner.handle)?;
        Ok(Stat {
            size,
            linkcount: 1,
        })
    }

    fn truncate(&self, len: u64) -> KResult<()> {
        let fs = self.fs();
        ops::trunc(fs.transport(), self.inner.handle, len)
    }

    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
}

/// The emulator's directory tree is flat passthrough to the host: every
/// entry is either a regular file or another directory, but emufs itself
/// never creates subdirectories (`mkdir` is `ENOSYS`, ground:
/// `emufs_mkdir` always returning `EUNIMP`), and none of hard links,
/// symlinks, or rename are supported either (`emufs_link`/`emufs_symlink`/
/// `emufs_rename` all return `EUNIMP`).
pub struct EmufsDir {
    inner: Arc<EmufsVnodeInner>,
}

impl EmufsDir {
    pub fn new(inner: Arc<EmufsVnodeInner>) -> Self {
        EmufsDir { inner }
    }

    fn fs(&self) -> Arc<Emufs> {
        self.inner
            .fs
            .upgrade()
            .expect("emufs: vnode outlived its filesystem")
    }
}

impl DirectoryOps for EmufsDir {
    fn lookup(&self, name: &str) -> KResult<File> {
        let fs = self.fs();
        let (handle, is_dir) = ops::open(fs.transport(), self.inner.handle, name, false, false)?;
        let vnode = load_vnode(&fs, handle, is_dir);
        Ok(wrap(vnode, is_dir))
    }

    fn getdirentry(&self, slot: u32) -> KResult<String> {
        let fs = self.fs();
        match ops::readdir(fs.transport(), self.inner.handle, slot)? {
            Some(name) => Ok(name),
            None => Err(KernelError::NotFound),
        }
    }

    fn creat(&self, name: &str, flags: OpenFlags) -> KResult<File> {
        let excl = flags.contains(OpenFlags::EXCL);
        let fs = self.fs();
        let (handle, is_dir) = ops::open(fs.transport(), self.inner.handle, name, true, excl)?;
        let vnode = load_vnode(&fs, handle, is_dir);
        Ok(wrap(vnode, is_dir))
    }

    fn remove(&self, _name: &str) -> KResult<()> {
        Err(KernelError::NotSupported)
    }

    fn rename(&self, _old: &str, _new: &str) -> KResult<()> {
        Err(KernelError::NotSupported)
    }

    fn stat(&self) -> KResult<Stat> {
        let fs = self.fs();
        let size = ops::getsize(fs.transport(), self.inner.handle)?;
        Ok(Stat {
            size,
            linkcount: 1,
        })
    }

    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
}

pub fn wrap(vnode: Arc<EmufsVnodeInner>, is_dir: bool) -> File {
    if is_dir {
        File::Directory(Arc::new(EmufsDir::new(vnode)))
    } else {
        File::Regular(Arc::new(EmufsFile::new(vnode)))
    }
}
