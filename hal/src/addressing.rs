//! Address newtypes.
//!
//! Kept deliberately small: this workspace does not implement a page-table
//! walker or MMU driver (that is platform-specific collaborator code), but
//! the pool allocator and the MMIO accessors in [`crate::dev`] still need to
//! talk about physical and kernel-virtual addresses without confusing the
//! two, the way `abyss::addressing` separates them for the rest of KeOS.
use core::fmt;

/// A physical address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pa(pub u64);

/// A kernel-virtual address (identity-mapped or not, depending on platform).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Kva(pub u64);

impl Pa {
    pub const fn new(addr: u64) -> Self {
        Pa(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }
}

impl Kva {
    pub const fn new(addr: u64) -> Self {
        Kva(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// # Safety
    /// `addr` must be a valid kernel-virtual address for the lifetime `'a`.
    pub unsafe fn as_ptr<'a, T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Debug for Pa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pa({:#x})", self.0)
    }
}

impl fmt::Debug for Kva {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kva({:#x})", self.0)
    }
}

impl core::ops::Add<u64> for Pa {
    type Output = Pa;
    fn add(self, rhs: u64) -> Pa {
        Pa(self.0 + rhs)
    }
}

impl core::ops::Add<u64> for Kva {
    type Output = Kva;
    fn add(self, rhs: u64) -> Kva {
        Kva(self.0 + rhs)
    }
}
