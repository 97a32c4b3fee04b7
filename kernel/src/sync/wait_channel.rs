//! Wait channels and the counting semaphore built on top of one.
use alloc::collections::VecDeque;
use hal::spinlock::{SpinLock, SpinLockGuard};

use crate::thread::{self, ThreadId};

/// A FIFO sleeper list, always paired with a caller-provided spinlock that
/// protects both this list and whatever condition the caller is sleeping
/// on. `WaitChannel` itself holds no lock: callers lock their own spinlock,
/// observe their condition, and call [`sleep_on`] to atomically enqueue and
/// block.
pub struct WaitChannel {
    name: &'static str,
    sleepers: VecDeque<ThreadId>,
}

impl WaitChannel {
    pub const fn new(name: &'static str) -> Self {
        WaitChannel {
            name,
            sleepers: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Advisory only, per spec: callers must not use this to avoid races,
    /// only for diagnostics.
    pub fn is_empty(&self) -> bool {
        self.sleepers.is_empty()
    }

    /// Requires the companion spinlock held. Used directly by [`super::cv::Cv`],
    /// which manages its own lock release/reacquire sequence rather than
    /// going through [`sleep_on`].
    pub(crate) fn enqueue(&mut self, id: ThreadId) {
        self.sleepers.push_back(id);
    }

    /// Requires the companion spinlock held. Wakes the longest-sleeping
    /// thread, if any.
    pub fn wake_one(&mut self) {
        if let Some(id) = self.sleepers.pop_front() {
            thread::wake(id);
        }
    }

    /// Requires the companion spinlock held. Wakes every sleeper.
    pub fn wake_all(&mut self) {
        while let Some(id) = self.sleepers.pop_front() {
            thread::wake(id);
        }
    }
}

/// Enqueues the current thread on `wc` and blocks, releasing `guard` (on
/// `lock`) in between, and reacquiring `lock` before returning — the
/// sequence spec §4.2 requires of `sleep(wc, spinlock)`.
pub fn sleep_on<'a, T>(
    lock: &'a SpinLock<T>,
    mut guard: SpinLockGuard<'a, T>,
    get_wc: impl FnOnce(&mut T) -> &mut WaitChannel,
) -> SpinLockGuard<'a, T> {
    get_wc(&mut guard).sleepers.push_back(thread::current_id());
    guard.unlock();
    thread::block_current();
    lock.lock()
}

struct SemState {
    count: u32,
    wc: WaitChannel,
}

/// Non-negative counter with its own companion spinlock. `P` in interrupt
/// context is a bug (would need to block with interrupts disabled); `V` is
/// legal there.
pub struct Semaphore {
    inner: SpinLock<SemState>,
}

impl Semaphore {
    pub const fn new(name: &'static str, initial: u32) -> Self {
        Semaphore {
            inner: SpinLock::new(SemState {
                count: initial,
                wc: WaitChannel::new(name),
            }),
        }
    }

    /// Decrements the counter, blocking while it is zero.
    pub fn p(&self) {
        debug_assert!(
            !hal_interrupt_context(),
            "sem_P in interrupt context is a bug"
        );
        let mut g = self.inner.lock();
        while g.count == 0 {
            g = sleep_on(&self.inner, g, |s| &mut s.wc);
        }
        g.count -= 1;
        g.unlock();
    }

    /// Increments the counter and wakes at most one sleeper. Legal in
    /// interrupt context.
    pub fn v(&self) {
        let mut g = self.inner.lock();
        g.count += 1;
        g.wc.wake_one();
        g.unlock();
    }

    pub fn count(&self) -> u32 {
        let g = self.inner.lock();
        let c = g.count;
        g.unlock();
        c
    }
}

fn hal_interrupt_context() -> bool {
    hal::interrupt::in_interrupt_disabled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ensure_platform;
    use crate::thread::test_support::enter_as_thread;
    use std::sync::Arc;

    #[test]
    fn p_blocks_until_v() {
        ensure_platform();
        enter_as_thread(0);
        let sem = Arc::new(Semaphore::new("test", 0));
        let sem2 = sem.clone();
        let t = std::thread::spawn(move || {
            enter_as_thread(1);
            sem2.p();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        sem.v();
        t.join().unwrap();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn v_then_p_does_not_block() {
        ensure_platform();
        enter_as_thread(0);
        let sem = Semaphore::new("test", 0);
        sem.v();
        sem.p();
        assert_eq!(sem.count(), 0);
    }
}
