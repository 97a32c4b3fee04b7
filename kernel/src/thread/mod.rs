//! Threads: identity, state, and the blocking primitives the `sync` module
//! builds wait channels and semaphores on top of. Per-CPU run queues,
//! migration, and IPI handling live in [`scheduler`].
pub mod scheduler;

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use hal::spinlock::SpinLock;

pub type ThreadId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Ready = 0,
    Running = 1,
    Sleeping = 2,
    Zombie = 3,
}

/// The real suspend/resume mechanism is platform-specific (saving and
/// restoring a kernel stack's register file). This crate never does that
/// itself; it asks a registered [`ParkingPlatform`] to park the calling
/// thread and to unpark a target one, the way `hal::cpu::Platform` is asked
/// for `idle()`/`cpu_id()` rather than reading hardware registers directly.
pub trait ParkingPlatform: Send + Sync + 'static {
    fn park(&self);
    fn unpark(&self, thread: ThreadId);
}

static mut PARKING: Option<&'static dyn ParkingPlatform> = None;
static PARKING_READY: AtomicBool = AtomicBool::new(false);

pub fn set_parking_platform(p: &'static dyn ParkingPlatform) {
    assert!(
        !PARKING_READY.load(Ordering::Acquire),
        "set_parking_platform called twice"
    );
    unsafe {
        PARKING = Some(p);
    }
    PARKING_READY.store(true, Ordering::Release);
}

fn parking() -> &'static dyn ParkingPlatform {
    assert!(
        PARKING_READY.load(Ordering::Acquire),
        "thread module used before set_parking_platform"
    );
    unsafe { PARKING.unwrap() }
}

struct ThreadRecord {
    id: ThreadId,
    state: AtomicU8,
    pending_wake: AtomicBool,
    cpu: usize,
}

const MAX_THREADS: usize = 512;

struct ThreadTable {
    records: alloc::vec::Vec<ThreadRecord>,
}

static TABLE: SpinLock<Option<ThreadTable>> = SpinLock::new(None);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// "Which kernel thread is this" on a real kernel is answered by reading a
/// per-CPU pointer to the running thread's control block; that plumbing
/// belongs to the scheduler. Until the scheduler wires in the per-CPU
/// variant, this is a single-CPU placeholder (real builds) or a std
/// thread-local (host tests, where each OS thread is its own simulated
/// kernel thread).
#[cfg(not(test))]
mod current_id_cell {
    use core::sync::atomic::{AtomicU64, Ordering};
    static CURRENT: AtomicU64 = AtomicU64::new(0);
    pub fn get() -> u64 {
        CURRENT.load(Ordering::Acquire)
    }
    pub fn set(id: u64) {
        CURRENT.store(id, Ordering::Release);
    }
}

#[cfg(test)]
mod current_id_cell {
    std::thread_local! {
        static CURRENT: core::cell::Cell<u64> = core::cell::Cell::new(0);
    }
    pub fn get() -> u64 {
        CURRENT.with(|c| c.get())
    }
    pub fn set(id: u64) {
        CURRENT.with(|c| c.set(id));
    }
}

fn get_current_id() -> ThreadId {
    current_id_cell::get()
}

fn set_current_id(id: ThreadId) {
    current_id_cell::set(id)
}

/// Registers the calling OS/hardware thread as kernel thread `id`, owned by
/// `cpu`. Must be called once per execution context before any other call
/// into this module from that context.
pub fn register_current(cpu: usize) -> ThreadId {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let mut g = TABLE.lock();
    if g.is_none() {
        *g = Some(ThreadTable {
            records: alloc::vec::Vec::with_capacity(MAX_THREADS),
        });
    }
    g.as_mut().unwrap().records.push(ThreadRecord {
        id,
        state: AtomicU8::new(ThreadState::Running as u8),
        pending_wake: AtomicBool::new(false),
        cpu,
    });
    g.unlock();
    set_current_id(id);
    id
}

pub fn current_id() -> ThreadId {
    get_current_id()
}

/// A snapshot of every registered thread's `(id, state, owning cpu)`, for
/// diagnostic listing (the menu's `p` command; ground:
/// `original_source/kern/test/threadlist.c`'s array dump of all threads).
/// Advisory only — threads may change state the instant after this
/// returns, the same way the original's listing is a point-in-time dump
/// taken without per-thread locks held across the whole walk.
pub fn snapshot() -> alloc::vec::Vec<(ThreadId, ThreadState, usize)> {
    let g = TABLE.lock();
    let r = g
        .as_ref()
        .map(|t| {
            t.records
                .iter()
                .map(|r| {
                    let state = match r.state.load(Ordering::Acquire) {
                        0 => ThreadState::Ready,
                        1 => ThreadState::Running,
                        2 => ThreadState::Sleeping,
                        _ => ThreadState::Zombie,
                    };
                    (r.id, state, r.cpu)
                })
                .collect()
        })
        .unwrap_or_default();
    g.unlock();
    r
}

fn with_record<R>(id: ThreadId, f: impl FnOnce(&ThreadRecord) -> R) -> R {
    let g = TABLE.lock();
    let rec = g
        .as_ref()
        .unwrap()
        .records
        .iter()
        .find(|r| r.id == id)
        .expect("unknown ThreadId");
    let r = f(rec);
    g.unlock();
    r
}

/// Blocks the calling thread. If a `wake` for this thread already arrived
/// (it raced ahead of us actually parking), returns immediately instead of
/// parking — this is what keeps `Cv::wait`/`sleep_on` race-free without
/// needing the wait channel's lock held for the entire park.
pub fn block_current() {
    let id = current_id();
    let already_woken = with_record(id, |r| r.pending_wake.swap(false, Ordering::AcqRel));
    if already_woken {
        return;
    }
    with_record(id, |r| r.state.store(ThreadState::Sleeping as u8, Ordering::Release));
    parking().park();
    with_record(id, |r| r.state.store(ThreadState::Running as u8, Ordering::Release));
}

/// Wakes `id`. Legal to call from any context, including while another
/// thread holds spinlocks this thread will want once runnable.
pub fn wake(id: ThreadId) {
    with_record(id, |r| r.pending_wake.store(true, Ordering::Release));
    parking().unpark(id);
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! A [`ParkingPlatform`] backed by real OS threads, for host tests:
    //! `park` parks the calling OS thread, `unpark` unparks the OS thread
    //! registered for that [`ThreadId`].
    use super::{ParkingPlatform, ThreadId};
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};
    use std::thread::Thread;

    pub struct StdParking {
        handles: Mutex<HashMap<ThreadId, Thread>>,
    }

    impl StdParking {
        pub fn register(&self, id: ThreadId) {
            self.handles
                .lock()
                .unwrap()
                .insert(id, std::thread::current());
        }
    }

    impl ParkingPlatform for StdParking {
        fn park(&self) {
            std::thread::park();
        }
        fn unpark(&self, thread: ThreadId) {
            if let Some(h) = self.handles.lock().unwrap().get(&thread) {
                h.unpark();
            }
        }
    }

    static INIT: Once = Once::new();
    static mut PARKING: Option<&'static StdParking> = None;

    pub fn ensure_parking() -> &'static StdParking {
        INIT.call_once(|| {
            let p: &'static StdParking = Box::leak(Box::new(StdParking {
                handles: Mutex::new(HashMap::new()),
            }));
            unsafe {
                PARKING = Some(p);
            }
            super::set_parking_platform(p);
        });
        unsafe { PARKING.unwrap() }
    }

    /// Registers the calling OS thread as a fresh kernel [`ThreadId`] with
    /// both the identity map (`register_current`) and the parking table.
    pub fn enter_as_thread(cpu: usize) -> ThreadId {
        let parking = ensure_parking();
        let id = super::register_current(cpu);
        parking.register(id);
        id
    }
}
