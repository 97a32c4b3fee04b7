//! The user-facing semaphore object: a counter with blocking P, plus the
//! "is it still reachable" bookkeeping needed to know when to destroy it.
//!
//! Ground: `original_source/kern/fs/semfs/semfs_obj.c` (`semfs_sem_create`)
//! and `semfs_vnops.c` (`semfs_read`/`_write`/`_truncate`/`_wakeup`). Rather
//! than a dedicated `struct lock` + `struct cv` pair per sem (the
//! original's `sems_lock`/`sems_cv`), this reuses the exact shape
//! `kernel::sync::wait_channel::Semaphore` already uses for "a counter with
//! a blocking decrement": a spinlock guarding the counter plus a
//! `WaitChannel`, generalized here to variable-sized P/V and the two extra
//! bookkeeping bits semfs needs (`has_vnode`, `linked`).
use hal::spinlock::SpinLock;
use kernel::sync::wait_channel::{sleep_on, WaitChannel};
use kernel::{KernelError, KResult};

struct SemState {
    count: u32,
    has_vnode: bool,
    linked: bool,
    wc: WaitChannel,
}

impl SemState {
    /// Ground: `semfs_wakeup`. Only woken sleepers can possibly be waiting
    /// (count was 0 going in); one sleeper can make progress with a count
    /// of exactly 1, more than that needs everyone re-checking.
    fn wakeup(&mut self, newcount: u32) {
        if self.count > 0 || newcount == 0 {
            return;
        }
        if newcount == 1 {
            self.wc.wake_one();
        } else {
            self.wc.wake_all();
        }
    }
}

pub struct Sem {
    inner: SpinLock<SemState>,
}

impl Sem {
    pub fn new() -> Self {
        Sem {
            inner: SpinLock::new(SemState {
                count: 0,
                has_vnode: false,
                linked: false,
                wc: WaitChannel::new("semfs:sem"),
            }),
        }
    }

    /// P: consumes up to `len` units, blocking while the counter is zero
    /// and more is still wanted. Ground: `semfs_read`'s `while
    /// uio_resid > 0` loop; the original doesn't transfer any byte
    /// content, it only advances the I/O cursor, which the caller does
    /// with the returned count.
    pub fn read(&self, len: usize) -> usize {
        let mut g = self.inner.lock();
        let mut resid = len;
        loop {
            if g.count > 0 {
                let consume = resid.min(g.count as usize);
                g.count -= consume as u32;
                resid -= consume;
            }
            if resid == 0 {
                break;
            }
            g = sleep_on(&self.inner, g, |s| &mut s.wc);
        }
        g.unlock();
        len
    }

    /// V: adds `len` units, waking sleepers per [`SemState::wakeup`].
    /// `TooBig` if the counter would overflow `u32`. Ground: `semfs_write`.
    pub fn write(&self, len: usize) -> KResult<usize> {
        let mut g = self.inner.lock();
        let newcount = g.count as u64 + len as u64;
        if newcount > u32::MAX as u64 {
            g.unlock();
            return Err(KernelError::TooBig);
        }
        g.wakeup(newcount as u32);
        g.count = newcount as u32;
        g.unlock();
        Ok(len)
    }

    /// Sets the counter directly, per `semfs_truncate`: lets `O_TRUNC`
    /// reset a semaphore, and lets a freshly created one be initialized
    /// to a count other than zero.
    pub fn truncate(&self, newcount: u32) {
        let mut g = self.inner.lock();
        g.wakeup(newcount);
        g.count = newcount;
        g.unlock();
    }

    pub fn count(&self) -> u32 {
        let g = self.inner.lock();
        let c = g.count;
        g.unlock();
        c
    }

    pub fn has_vnode(&self) -> bool {
        let g = self.inner.lock();
        let v = g.has_vnode;
        g.unlock();
        v
    }

    pub fn set_has_vnode(&self, v: bool) {
        let mut g = self.inner.lock();
        g.has_vnode = v;
        g.unlock();
    }

    pub fn linked(&self) -> bool {
        let g = self.inner.lock();
        let v = g.linked;
        g.unlock();
        v
    }

    pub fn set_linked(&self, v: bool) {
        let mut g = self.inner.lock();
        g.linked = v;
        g.unlock();
    }
}

impl Default for Sem {
    fn default() -> Self {
        Self::new()
    }
}
