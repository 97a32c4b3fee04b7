//! Typed memory-mapped register access.
//!
//! Ported from `abyss::dev::mmio`'s `MmioAccessor`/`MmioArrayAccessor`
//! pattern: a register is a typed offset into a device's MMIO window rather
//! than a raw pointer the caller computes by hand, so reading the wrong width
//! or indexing past an array register is a type error, not a bug that shows
//! up under emulation. `quill-emufs` builds its HANDLE/OFFSET/IOLEN/OPER/
//! RESULT register block and its 32768-byte I/O buffer window on top of
//! this.
use core::marker::PhantomData;

/// A region of MMIO address space, not yet known to be safely mappable.
/// The platform turns this into an [`ActiveMmioArea`] once the window is
/// mapped uncached into kernel-virtual space.
pub struct MmioArea {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for MmioArea {}
unsafe impl Sync for MmioArea {}

impl MmioArea {
    /// # Safety
    /// `base..base+len` must be a valid, exclusively-owned MMIO window for
    /// the lifetime of the returned value.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        MmioArea { base, len }
    }

    pub fn activate(self) -> ActiveMmioArea {
        ActiveMmioArea(self)
    }
}

/// An [`MmioArea`] known to be live; register accessors borrow from this.
pub struct ActiveMmioArea(MmioArea);

impl ActiveMmioArea {
    /// A single scalar register at `offset`.
    pub fn accessor<T: Copy>(&self, offset: usize) -> MmioAccessor<'_, T> {
        assert!(offset + core::mem::size_of::<T>() <= self.0.len);
        MmioAccessor {
            ptr: unsafe { self.0.base.add(offset) as *mut T },
            _area: PhantomData,
        }
    }

    /// An array of `len` elements of `T`, base-addressed at `offset`.
    pub fn array_accessor<T: Copy>(&self, offset: usize, len: usize) -> MmioArrayAccessor<'_, T> {
        assert!(offset + len * core::mem::size_of::<T>() <= self.0.len);
        MmioArrayAccessor {
            base: unsafe { self.0.base.add(offset) as *mut T },
            len,
            _area: PhantomData,
        }
    }

    /// Raw byte slice over the whole window, for bulk transfer registers
    /// (emufs's I/O buffer).
    pub fn bytes(&self, offset: usize, len: usize) -> &'_ mut [u8] {
        assert!(offset + len <= self.0.len);
        unsafe { core::slice::from_raw_parts_mut(self.0.base.add(offset), len) }
    }
}

/// A single volatile register of type `T`.
pub struct MmioAccessor<'a, T> {
    ptr: *mut T,
    _area: PhantomData<&'a ActiveMmioArea>,
}

impl<'a, T: Copy> MmioAccessor<'a, T> {
    pub fn read(&self) -> T {
        unsafe { self.ptr.read_volatile() }
    }

    pub fn write(&self, value: T) {
        unsafe { self.ptr.write_volatile(value) }
    }
}

/// An array of volatile registers of type `T`.
pub struct MmioArrayAccessor<'a, T> {
    base: *mut T,
    len: usize,
    _area: PhantomData<&'a ActiveMmioArea>,
}

impl<'a, T: Copy> MmioArrayAccessor<'a, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read(&self, index: usize) -> T {
        assert!(index < self.len);
        unsafe { self.base.add(index).read_volatile() }
    }

    pub fn write(&self, index: usize, value: T) {
        assert!(index < self.len);
        unsafe { self.base.add(index).write_volatile(value) }
    }
}

/// Declares a named set of register offsets for a device, the way
/// `abyss::mmio!` does, so a device module reads like a register datasheet
/// rather than a pile of magic numbers.
#[macro_export]
macro_rules! mmio_registers {
    ($(($name:ident, $offset:expr)),* $(,)?) => {
        $(
            #[allow(non_upper_case_globals)]
            pub const $name: usize = $offset;
        )*
    };
}
