//! CPU identity.
//!
//! A real boot sequence brings up one bootstrap processor and some number of
//! application processors, each discoverable through a platform register
//! (APIC id, `mpidr_el1`, ...). This crate never reads that register itself;
//! it is handed a [`Platform`] implementation once, at boot, exactly the way
//! `keos::thread::scheduler` is handed a [`Scheduler`] implementation once
//! via `SystemConfigurationBuilder::set_scheduler`. Everything downstream
//! (the IPL nesting counters in [`crate::interrupt`], the per-CPU run queues
//! in the kernel crate) is generic over "some number of CPUs, identified by
//! a dense index", and doesn't care how that index was obtained.
use core::sync::atomic::{AtomicBool, Ordering};

/// The host-specific operations the rest of this workspace needs from a CPU.
pub trait Platform: Send + Sync + 'static {
    /// Number of CPUs brought up for this boot.
    fn cpu_count(&self) -> usize;
    /// Dense index (`0..cpu_count()`) of the CPU executing this call.
    fn cpu_id(&self) -> usize;
    /// Park the calling CPU until the next interrupt.
    ///
    /// Called with the run-queue spinlock already released; must return
    /// (rather than loop forever) so the scheduler can re-check for work.
    fn idle(&self);
}

static mut PLATFORM: Option<&'static dyn Platform> = None;
static PLATFORM_READY: AtomicBool = AtomicBool::new(false);

/// Register the platform. Must be called exactly once, before any other
/// call into this crate, from the bootstrap processor.
pub fn set_platform(p: &'static dyn Platform) {
    assert!(
        !PLATFORM_READY.load(Ordering::Acquire),
        "hal::cpu::set_platform called twice"
    );
    unsafe {
        PLATFORM = Some(p);
    }
    PLATFORM_READY.store(true, Ordering::Release);
}

fn platform() -> &'static dyn Platform {
    assert!(
        PLATFORM_READY.load(Ordering::Acquire),
        "hal::cpu used before set_platform"
    );
    unsafe { PLATFORM.unwrap() }
}

/// The dense index of the calling CPU.
pub fn id() -> usize {
    platform().cpu_id()
}

/// The number of CPUs brought up for this boot.
pub fn count() -> usize {
    platform().cpu_count()
}

/// Park the calling CPU until the next interrupt.
pub fn idle() {
    platform().idle()
}

#[cfg(any(test, feature = "mem-disk"))]
pub mod test_support {
    //! A [`Platform`] for host tests: each host OS thread is its own
    //! simulated CPU, assigned a dense id the first time it calls in.
    use super::Platform;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    pub struct ThreadPerCpu {
        ncpu: usize,
        ids: Mutex<HashMap<ThreadId, usize>>,
    }

    impl ThreadPerCpu {
        pub fn new(ncpu: usize) -> Self {
            Self {
                ncpu,
                ids: Mutex::new(HashMap::new()),
            }
        }
    }

    impl Platform for ThreadPerCpu {
        fn cpu_count(&self) -> usize {
            self.ncpu
        }
        fn cpu_id(&self) -> usize {
            let mut ids = self.ids.lock().unwrap();
            let next = ids.len();
            *ids.entry(std::thread::current().id()).or_insert_with(|| next % self.ncpu)
        }
        fn idle(&self) {
            std::thread::yield_now();
        }
    }

    static INIT: std::sync::Once = std::sync::Once::new();

    /// Registers a shared [`ThreadPerCpu`] platform the first time any test
    /// in this crate calls it; a no-op on later calls. All `#[cfg(test)]`
    /// code in this crate that touches `cpu::id()` goes through this instead
    /// of calling `set_platform` directly, since `cargo test` runs every
    /// test in the crate inside one process and `set_platform` panics if
    /// called twice.
    pub fn ensure_platform() {
        INIT.call_once(|| {
            let platform: &'static ThreadPerCpu = Box::leak(Box::new(ThreadPerCpu::new(8)));
            super::set_platform(platform);
        });
    }
}
