//! `quill-hal`: the platform layer.
//!
//! Everything in this crate is either genuinely hardware-specific (raising
//! IPL, finding the current CPU) or stands in for it in a way that lets the
//! rest of the workspace run and be tested on a host. Real boot code, trap
//! entry, and MMU/page-table management are out of scope here — they are the
//! collaborators this crate's traits let the kernel core stay agnostic to.
#![cfg_attr(not(test), no_std)]

pub mod addressing;
pub mod cpu;
pub mod dev;
pub mod interrupt;
pub mod spinlock;

/// Upper bound on the number of CPUs this build supports.
///
/// A fixed bound (rather than a heap-allocated table) keeps the per-CPU
/// arrays usable before the allocator is initialized, matching the teacher's
/// `abyss::MAX_CPU` constant.
pub const MAX_CPU: usize = 32;
