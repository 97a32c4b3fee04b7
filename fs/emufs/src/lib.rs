//! `quill-emufs`: passthrough to the host filesystem via the emulator's
//! register-and-shared-buffer device, for use as the boot filesystem
//! under `sys161` before a real on-disk filesystem is mounted.
//!
//! Ground: `original_source/kern/fs/emufs/*` and
//! `kern/dev/lamebus/emu.c`, split the same way as `quill-sfs`: wire
//! protocol and transport ([`protocol`], [`hw`]), client-side operation
//! helpers ([`ops`]), and the VFS-facing vnode/filesystem wrappers
//! ([`vnode`], [`fs`]).
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod fs;
pub mod hw;
pub mod ops;
pub mod protocol;
pub mod vnode;

pub use fs::{Emufs, EmufsMount};
