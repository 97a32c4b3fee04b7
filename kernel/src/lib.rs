//! `quill-kernel`: the portable core — thread/sync substrate, pool
//! allocator, VFS layer, and user-copy boundary. Concrete filesystems
//! (`quill-sfs`, `quill-emufs`, `quill-semfs`) depend on this crate and
//! implement [`vfs::RegularFileOps`]/[`vfs::DirectoryOps`]/[`vfs::FsOps`]
//! against it.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod mm;
pub mod sync;
pub mod thread;
pub mod uaccess;
pub mod vfs;

use core::fmt;

/// Kernel error taxonomy, mirroring the errno surface the VFS boundary
/// exposes. Kept as a flat enum with manual `Display`/`Error` impls rather
/// than a `thiserror`-derived type: the teacher's own `KernelError`
/// (`keos/src/lib.rs`) is a hand-rolled enum for the same reason — the crate
/// is `no_std` and errno mapping is a fixed, closed set, not something that
/// benefits from a derive macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KernelError {
    /// Op is valid only on a directory.
    IsDir,
    /// Op is valid only on a non-directory.
    NotDir,
    /// Argument out of the valid range for this op.
    Invalid,
    /// Name not found.
    NotFound,
    /// Name already exists.
    Exists,
    /// Allocator exhausted.
    NoMemory,
    /// Filesystem has no free blocks/inodes left.
    NoSpace,
    /// No free file-object slots.
    TooManyOpenFiles,
    /// Offset/size exceeds what this format can represent.
    TooBig,
    /// I/O failed after exhausting retries.
    Io,
    /// A user pointer faulted, or fell outside the user address range.
    Fault,
    /// A NUL-terminated string exceeded its bound without finding NUL.
    NameTooLong,
    /// Op has no implementation for this object kind.
    NotSupported,
    /// Object is referenced elsewhere; op refused.
    Busy,
}

impl KernelError {
    /// The conventional errno-style short name, used in log lines and test
    /// assertions so failures read the way the on-disk spec names them.
    pub const fn errno_name(self) -> &'static str {
        match self {
            KernelError::IsDir => "EISDIR",
            KernelError::NotDir => "ENOTDIR",
            KernelError::Invalid => "EINVAL",
            KernelError::NotFound => "ENOENT",
            KernelError::Exists => "EEXIST",
            KernelError::NoMemory => "ENOMEM",
            KernelError::NoSpace => "ENOSPC",
            KernelError::TooManyOpenFiles => "ENFILE",
            KernelError::TooBig => "EFBIG",
            KernelError::Io => "EIO",
            KernelError::Fault => "EFAULT",
            KernelError::NameTooLong => "ENAMETOOLONG",
            KernelError::NotSupported => "ENOSYS",
            KernelError::Busy => "EBUSY",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errno_name())
    }
}

impl core::error::Error for KernelError {}

pub type KResult<T> = Result<T, KernelError>;

/// Kernel-side logging, grounded on `abyss::{info,warning}`/
/// `keos::teletype`: a tiny macro-based sink rather than the `log` crate,
/// since there is no executor to register a `log::Log` implementation with
/// before the console driver exists.
pub mod teletype {
    use core::fmt::Arguments;

    /// Installed once by the platform at boot; `None` means "drop the line"
    /// (useful for host unit tests that don't care about kernel log output).
    static mut SINK: Option<fn(Arguments<'_>)> = None;

    /// # Safety
    /// Must be called at most once, before any logging macro runs
    /// concurrently with it.
    pub unsafe fn set_sink(sink: fn(Arguments<'_>)) {
        SINK = Some(sink);
    }

    #[doc(hidden)]
    pub fn emit(args: Arguments<'_>) {
        unsafe {
            if let Some(sink) = SINK {
                sink(args);
            }
        }
    }
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::teletype::emit(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warning {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::teletype::emit(format_args!(concat!("warning: ", $fmt) $(, $arg)*))
    };
}

/// Shared host-test scaffolding: every `#[cfg(test)]` module in this crate
/// that touches a spinlock (directly or via the pool/sync/vfs layers above
/// it) needs a [`hal::cpu::Platform`] registered first.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use hal::cpu::Platform;
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};
    use std::thread::ThreadId;

    struct ThreadPerCpu {
        ncpu: usize,
        ids: Mutex<HashMap<ThreadId, usize>>,
    }

    impl Platform for ThreadPerCpu {
        fn cpu_count(&self) -> usize {
            self.ncpu
        }
        fn cpu_id(&self) -> usize {
            let mut ids = self.ids.lock().unwrap();
            let next = ids.len();
            *ids.entry(std::thread::current().id())
                .or_insert_with(|| next % self.ncpu)
        }
        fn idle(&self) {
            std::thread::yield_now();
        }
    }

    static INIT: Once = Once::new();

    pub fn ensure_platform() {
        INIT.call_once(|| {
            let platform: &'static ThreadPerCpu = Box::leak(Box::new(ThreadPerCpu {
                ncpu: 8,
                ids: Mutex::new(HashMap::new()),
            }));
            hal::cpu::set_platform(platform);
        });
    }
}
