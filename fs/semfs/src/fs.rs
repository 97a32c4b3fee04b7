//! The mounted filesystem object: the semaphore table, the flat
//! directory list, and the vnode cache that ties them to the VFS.
//!
//! Ground: `semfs_fsops.c` and the table/directory helpers in
//! `semfs_obj.c`/`semfs_vnops.c`. The original's `semfs_tablelock` and
//! `semfs_dirlock` are sleeping `struct lock`s; here they're
//! [`SpinLock`]s, matching `quill-sfs`'s and `quill-emufs`'s vnode-cache
//! locks, since every table/directory critical section below is a short
//! array scan with no blocking inside it — nothing here ever waits on a
//! semaphore's own counter while holding one of these.
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use hal::spinlock::SpinLock;
use kernel::vfs::{File, FsOps};
use kernel::{KernelError, KResult};

use crate::sem::Sem;
use crate::vnode::{self, SemfsVnodeInner};

/// Sentinel semaphore number standing for the root directory, ground:
/// `semfs.h`'s `SEMFS_ROOTDIR`.
pub const SEMFS_ROOTDIR: u32 = u32::MAX;

struct DirEntry {
    name: String,
    semnum: u32,
}

pub struct Semfs {
    sems: SpinLock<Vec<Option<Arc<Sem>>>>,
    dents: SpinLock<Vec<Option<DirEntry>>>,
    vnodes: SpinLock<Vec<(u32, Weak<SemfsVnodeInner>)>>,
}

impl Semfs {
    pub fn new() -> Arc<Semfs> {
        Arc::new(Semfs {
            sems: SpinLock::new(Vec::new()),
            dents: SpinLock::new(Vec::new()),
            vnodes: SpinLock::new(Vec::new()),
        })
    }

    /// Ground: `semfs_getsembynum`. Panics if `semnum` has no live entry —
    /// every caller only ever holds a `semnum` that came from a directory
    /// entry or a vnode, both of which keep the table slot alive.
    pub fn get_sem(&self, semnum: u32) -> Arc<Sem> {
        let g = self.sems.lock();
        let sem = g
            .get(semnum as usize)
            .and_then(|s| s.clone())
            .unwrap_or_else(|| panic!("semfs: get_sem: no sem at slot {}", semnum));
        g.unlock();
        sem
    }

    /// Ground: `semfs_sem_insert`: reuse a freed slot, else append.
    /// `NoSpace` once the table has grown all the way to the
    /// `SEMFS_ROOTDIR` sentinel, the same absurdly large but real bound
    /// the original checks.
    pub(crate) fn sem_insert(&self, sem: Arc<Sem>) -> KResult<u32> {
        let mut g = self.sems.lock();
        if g.len() as u32 == SEMFS_ROOTDIR {
            g.unlock();
            return Err(KernelError::NoSpace);
        }
        if let Some(slot) = g.iter().position(|s| s.is_none()) {
            g[slot] = Some(sem);
            g.unlock();
            return Ok(slot as u32);
        }
        let slot = g.len() as u32;
        g.push(Some(sem));
        g.unlock();
        Ok(slot)
    }

    pub(crate) fn sem_clear(&self, semnum: u32) {
        let mut g = self.sems.lock();
        g[semnum as usize] = None;
        g.unlock();
    }

    /// Ground: `semfs_creat`'s directory scan. Returns the slot and
    /// semaphore number of `name`, if present.
    pub(crate) fn dir_find(&self, name: &str) -> Option<(u32, u32)> {
        let g = self.dents.lock();
        let found = g.iter().enumerate().find_map(|(i, d)| {
            d.as_ref()
                .filter(|d| d.name == name)
                .map(|d| (i as u32, d.semnum))
        });
        g.unlock();
        found
    }

    fn dir_insert(&self, name: &str, semnum: u32) -> u32 {
        let mut g = self.dents.lock();
        let entry = DirEntry {
            name: String::from(name),
            semnum,
        };
        if let Some(slot) = g.iter().position(|d| d.is_none()) {
            g[slot] = Some(entry);
            g.unlock();
            return slot as u32;
        }
        let slot = g.len() as u32;
        g.push(Some(entry));
        g.unlock();
        slot
    }

    fn dir_remove(&self, slot: u32) {
        let mut g = self.dents.lock();
        g[slot as usize] = None;
        g.unlock();
    }

    /// Ground: `semfs_getdirentry`. A slot past the end is EOF
    /// (`NotFound`, interpreted by callers as "stop iterating"); a slot
    /// within bounds but unlinked is likewise `NotFound`, the same way
    /// `quill-sfs`'s `dir::entry_name` treats an emptied slot.
    pub fn dir_entry_name(&self, slot: u32) -> KResult<String> {
        let g = self.dents.lock();
        let r = g
            .get(slot as usize)
            .and_then(|d| d.as_ref())
            .map(|d| d.name.clone())
            .ok_or(KernelError::NotFound);
        g.unlock();
        r
    }

    pub fn dir_count(&self) -> u32 {
        let g = self.dents.lock();
        let n = g.len() as u32;
        g.unlock();
        n
    }

    pub fn lookup_cached(&self, semnum: u32) -> Option<Arc<SemfsVnodeInner>> {
        let mut g = self.vnodes.lock();
        g.retain(|(_, w)| w.strong_count() > 0);
        let found = g
            .iter()
            .find(|(n, _)| *n == semnum)
            .and_then(|(_, w)| w.upgrade());
        g.unlock();
        found
    }

    pub fn insert_cached(&self, semnum: u32, vnode: &Arc<SemfsVnodeInner>) {
        let mut g = self.vnodes.lock();
        g.push((semnum, Arc::downgrade(vnode)));
        g.unlock();
    }

    pub fn remove_cached(&self, semnum: u32) {
        let mut g = self.vnodes.lock();
        g.retain(|(n, _)| *n != semnum);
        g.unlock();
    }

    pub fn live_vnode_count(&self) -> usize {
        let mut g = self.vnodes.lock();
        g.retain(|(_, w)| w.strong_count() > 0);
        let n = g.len();
        g.unlock();
        n
    }

    /// Looks up `name` in the flat root directory, creating a semaphore
    /// for it if it doesn't exist (or if it does and `excl` wasn't asked
    /// for). Ground: `semfs_creat`.
    pub fn creat(self: &Arc<Self>, name: &str, excl: bool) -> KResult<Arc<SemfsVnodeInner>> {
        if name == "." || name == ".." {
            return Err(KernelError::Exists);
        }
        if let Some((_, semnum)) = self.dir_find(name) {
            if excl {
                return Err(KernelError::Exists);
            }
            return Ok(vnode::load_vnode(self, semnum));
        }

        let sem = Arc::new(Sem::new());
        let semnum = match self.sem_insert(sem.clone()) {
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        self.dir_insert(name, semnum);
        let vnode = vnode::load_vnode(self, semnum);
        sem.set_linked(true);
        Ok(vnode)
    }

    /// Unlinks `name` from the directory. If nothing has it open, the
    /// semaphore is destroyed immediately; otherwise the last vnode
    /// reference's `Drop` does it. Ground: `semfs_remove`.
    pub fn remove(&self, name: &str) -> KResult<()> {
        if name == "." || name == ".." {
            return Err(KernelError::Invalid);
        }
        let Some((slot, semnum)) = self.dir_find(name) else {
            return Err(KernelError::NotFound);
        };
        let sem = self.get_sem(semnum);
        sem.set_linked(false);
        if !sem.has_vnode() {
            self.sem_clear(semnum);
        }
        self.dir_remove(slot);
        Ok(())
    }
}

pub struct SemfsMount(pub Arc<Semfs>);

impl FsOps for SemfsMount {
    fn sync(&self) -> KResult<()> {
        Ok(())
    }

    fn getvolname(&self) -> String {
        String::from("sem")
    }

    fn getroot(&self) -> File {
        let vnode = vnode::load_vnode(&self.0, SEMFS_ROOTDIR);
        vnode::wrap(vnode, true)
    }

    /// Ground: `semfs_unmount` — refuses while anything is open, and
    /// otherwise drops the whole table (here, just drops `self.0`; the
    /// original's explicit `semfs_destroy` walk is what `Drop` does for
    /// free once nothing references it).
    fn unmount(&self) -> KResult<()> {
        if self.0.live_vnode_count() > 0 {
            return Err(KernelError::Busy);
        }
        Ok(())
    }
}
