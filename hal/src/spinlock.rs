//! A test-and-test-and-set spinlock whose guard must be unlocked explicitly.
//!
//! Ported from the teacher's `abyss::spinlock`. Every lock built on top of
//! this in `quill-kernel` (`Lock`, `Semaphore`'s wait-queue lock,
//! `WaitChannel`'s companion spinlock) reuses this type directly rather than
//! re-implementing the pattern, so there is exactly one place that holds the
//! "never forget to unlock" invariant.
use crate::interrupt::InterruptGuard;
use core::cell::UnsafeCell;
use core::panic::Location;
use core::sync::atomic::{AtomicBool, Ordering};

pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Spins until the lock is acquired, masking interrupts on the calling
    /// CPU for as long as the returned guard lives.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let irq = InterruptGuard::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinLockGuard {
            lock: self,
            _irq: irq,
            held_at: Location::caller(),
            unlocked: false,
        }
    }

    /// Non-blocking acquire; `None` if already held.
    #[track_caller]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let irq = InterruptGuard::new();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard {
                lock: self,
                _irq: irq,
                held_at: Location::caller(),
                unlocked: false,
            })
        } else {
            None
        }
    }

    fn raw_unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// A held [`SpinLock`]. Must be released with [`SpinLockGuard::unlock`];
/// dropping a still-held guard panics, naming the call site that acquired it,
/// since a silently-dropped lock is almost always a bug (held across a
/// context switch, or released twice).
#[must_use]
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _irq: InterruptGuard,
    held_at: &'static Location<'static>,
    unlocked: bool,
}

impl<'a, T> SpinLockGuard<'a, T> {
    pub fn unlock(mut self) {
        self.unlocked = true;
        self.lock.raw_unlock();
    }

    pub fn get(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }

    pub fn get_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> core::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.get()
    }
}

impl<'a, T> core::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.get_mut()
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        if !self.unlocked {
            panic!(
                "SpinLockGuard acquired at {} dropped without calling .unlock()",
                self.held_at
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::test_support::ensure_platform;

    #[test]
    fn lock_unlock_roundtrip() {
        ensure_platform();
        let l = SpinLock::new(0u32);
        {
            let mut g = l.lock();
            *g += 1;
            g.unlock();
        }
        let g = l.lock();
        assert_eq!(*g, 1);
        g.unlock();
    }

    #[test]
    #[should_panic(expected = "dropped without calling .unlock()")]
    fn drop_without_unlock_panics() {
        ensure_platform();
        let l = SpinLock::new(0u32);
        let _g = l.lock();
    }

    #[test]
    fn try_lock_fails_while_held() {
        ensure_platform();
        let l = SpinLock::new(0u32);
        let g = l.lock();
        assert!(l.try_lock().is_none());
        g.unlock();
        assert!(l.try_lock().is_some_and(|g| {
            g.unlock();
            true
        }));
    }
}
