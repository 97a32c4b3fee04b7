//! Condition variables with a companion [`Lock`].
use hal::spinlock::SpinLock;

use super::lock::Lock;
use super::wait_channel::WaitChannel;
use crate::thread;

pub struct Cv {
    wc: SpinLock<WaitChannel>,
}

impl Cv {
    pub const fn new(name: &'static str) -> Self {
        Cv {
            wc: SpinLock::new(WaitChannel::new(name)),
        }
    }

    /// Atomically releases `lock` and blocks; reacquires `lock` before
    /// returning, per spec §4.2. Enqueuing onto the wait channel happens
    /// while `wc`'s own spinlock is held, *before* `lock` is released, so a
    /// concurrent `signal`/`broadcast` can never be missed between the two
    /// (it would have to wait for `wc`'s lock, which we hold until after
    /// `lock` is already released).
    pub fn wait(&self, lock: &Lock) {
        let mut g = self.wc.lock();
        g.enqueue(thread::current_id());
        g.unlock();
        lock.release_and_block();
    }

    pub fn signal(&self) {
        let mut g = self.wc.lock();
        g.wake_one();
        g.unlock();
    }

    pub fn broadcast(&self) {
        let mut g = self.wc.lock();
        g.wake_all();
        g.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ensure_platform;
    use crate::thread::test_support::enter_as_thread;
    use std::sync::Arc;

    #[test]
    fn signal_wakes_a_waiter() {
        ensure_platform();
        enter_as_thread(0);
        let lock = Arc::new(Lock::new("test"));
        let cv = Arc::new(Cv::new("test"));
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let lock2 = lock.clone();
        let cv2 = cv.clone();
        let ready2 = ready.clone();
        let t = std::thread::spawn(move || {
            enter_as_thread(1);
            lock2.acquire();
            while !ready2.load(std::sync::atomic::Ordering::SeqCst) {
                cv2.wait(&lock2);
            }
            lock2.release();
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        lock.acquire();
        ready.store(true, std::sync::atomic::Ordering::SeqCst);
        cv.signal();
        lock.release();
        t.join().unwrap();
    }
}
