//! The mounted filesystem object tying the transport, the vnode cache,
//! and [`FsOps`] together.
//!
//! Ground: `emufs_fsops.c`. `sync` is a no-op (the hardware has no
//! write-back cache to flush), `getvolname` has no name to report
//! (the original returns `NULL`), and `unmount` always fails with
//! `EBUSY` — ground: `emufs_fsops.c`'s `emufs_unmount`, which
//! unconditionally refuses since the emulator passthrough device has no
//! notion of a clean detach.
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use hal::spinlock::SpinLock;
use kernel::vfs::{File, FsOps};
use kernel::KResult;

use crate::hw::EmuTransport;
use crate::protocol::EMU_ROOTHANDLE;
use crate::vnode::{self, EmufsVnodeInner};

pub struct Emufs {
    transport: Arc<dyn EmuTransport>,
    vnodes: SpinLock<Vec<(u32, Weak<EmufsVnodeInner>)>>,
    /// A permanent strong reference to the root directory's vnode.
    /// Ground: `emufs_addtovfs` (emu.c:1313) pinning `ef_root` at mount
    /// time and `emufs_getroot` (emu.c:1245-1257) handing it back with an
    /// incref rather than reloading it — the root handle is never closed
    /// while the filesystem is mounted. Without this, `getroot()` would
    /// have to create a fresh vnode on every call (the cache otherwise
    /// holds only `Weak`s), and the very common case of a caller dropping
    /// the returned root `File` right after use (every absolute-path
    /// `VfsTable::lookup`) would run [`Drop for EmufsVnodeInner`] and
    /// close handle 0 out from under the mount.
    root: Arc<EmufsVnodeInner>,
}

impl Emufs {
    pub fn new(transport: Arc<dyn EmuTransport>) -> Arc<Emufs> {
        Arc::new_cyclic(|weak_self| {
            let root = Arc::new(EmufsVnodeInner::new(weak_self, EMU_ROOTHANDLE));
            let vnodes = alloc::vec![(EMU_ROOTHANDLE, Arc::downgrade(&root))];
            Emufs {
                transport,
                vnodes: SpinLock::new(vnodes),
                root,
            }
        })
    }

    pub fn transport(&self) -> &dyn EmuTransport {
        &*self.transport
    }

    /// The permanent root vnode; see the `root` field's doc comment for
    /// why this is pinned rather than reloaded on every call.
    pub fn root(&self) -> &Arc<EmufsVnodeInner> {
        &self.root
    }

    pub fn lookup_cached(&self, handle: u32) -> Option<Arc<EmufsVnodeInner>> {
        let mut g = self.vnodes.lock();
        g.retain(|(_, w)| w.strong_count() > 0);
        let found = g
            .iter()
            .find(|(h, _)| *h == handle)
            .and_then(|(_, w)| w.upgrade());
        g.unlock();
        found
    }

    pub fn insert_cached(&self, handle: u32, vnode: &Arc<EmufsVnodeInner>) {
        let mut g = self.vnodes.lock();
        g.push((handle, Arc::downgrade(vnode)));
        g.unlock();
    }

    pub fn remove_cached(&self, handle: u32) {
        let mut g = self.vnodes.lock();
        g.retain(|(h, _)| *h != handle);
        g.unlock();
    }
}

pub struct EmufsMount(pub Arc<Emufs>);

impl FsOps for EmufsMount {
    fn sync(&self) -> KResult<()> {
        Ok(())
    }

    fn getvolname(&self) -> String {
        String::new()
    }

    fn getroot(&self) -> File {
        vnode::wrap(self.0.root().clone(), true)
    }

    fn unmount(&self) -> KResult<()> {
        Err(kernel::KernelError::Busy)
    }
}
