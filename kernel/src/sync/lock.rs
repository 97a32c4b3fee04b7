//! A sleeping mutex with owner tracking.
use hal::spinlock::SpinLock;

use super::wait_channel::{sleep_on, WaitChannel};
use crate::thread::{self, ThreadId};

struct LockState {
    owner: Option<ThreadId>,
    wc: WaitChannel,
}

pub struct Lock {
    inner: SpinLock<LockState>,
}

impl Lock {
    pub const fn new(name: &'static str) -> Self {
        Lock {
            inner: SpinLock::new(LockState {
                owner: None,
                wc: WaitChannel::new(name),
            }),
        }
    }

    /// Blocks if held. Re-entrant acquire by the current owner is a
    /// programming error, not a deadlock to tolerate.
    pub fn acquire(&self) {
        let me = thread::current_id();
        let mut g = self.inner.lock();
        if g.owner == Some(me) {
            g.unlock();
            panic!("Lock::acquire: recursive acquire by current owner");
        }
        while g.owner.is_some() {
            g = sleep_on(&self.inner, g, |s| &mut s.wc);
        }
        g.owner = Some(me);
        g.unlock();
    }

    pub fn release(&self) {
        let me = thread::current_id();
        let mut g = self.inner.lock();
        if g.owner != Some(me) {
            g.unlock();
            panic!("Lock::release: not held by caller");
        }
        g.owner = None;
        g.wc.wake_one();
        g.unlock();
    }

    pub fn do_i_hold(&self) -> bool {
        let g = self.inner.lock();
        let r = g.owner == Some(thread::current_id());
        g.unlock();
        r
    }

    /// Releases the lock and blocks the calling thread, reacquiring before
    /// returning. Used by [`super::cv::Cv::wait`]; not part of the public
    /// `Lock` API a regular caller should reach for.
    pub(super) fn release_and_block(&self) {
        self.release();
        thread::block_current();
        self.acquire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ensure_platform;
    use crate::thread::test_support::enter_as_thread;
    use std::sync::Arc;

    #[test]
    fn mutual_exclusion() {
        ensure_platform();
        enter_as_thread(0);
        let lock = Arc::new(Lock::new("test"));
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut handles = Vec::new();
        for i in 0..4 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                enter_as_thread(i + 1);
                for _ in 0..100 {
                    lock.acquire();
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    lock.release();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 400);
    }

    #[test]
    #[should_panic(expected = "recursive acquire")]
    fn recursive_acquire_panics() {
        ensure_platform();
        enter_as_thread(0);
        let lock = Lock::new("test");
        lock.acquire();
        lock.acquire();
    }
}
