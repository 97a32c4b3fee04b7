//! Collaborator seams: how the menu finds a device by name.
//!
//! Real device discovery (bus probing, LAMEbus slot enumeration) is out
//! of scope for this core (spec §1's "device drivers other than the disk
//! and the emulator" collaborator boundary). The menu only needs to turn
//! a device-name argument into something `quill-sfs`/`quill-emufs` can
//! mount; the boot code that actually owns the devices implements these
//! two tiny traits and hands references to [`Menu::new`].
use alloc::boxed::Box;
use alloc::sync::Arc;

use emufs::hw::EmuTransport;
use hal::dev::BlockDevice;
use kernel::KResult;

/// Resolves a device name (e.g. `"lhd0"`) to a 512-byte block device, for
/// `mount sfs <device>`.
pub trait DeviceRegistry: Send + Sync {
    fn open_block_device(&self, name: &str) -> KResult<Box<dyn BlockDevice>>;
}

/// Resolves a device name (e.g. `"emu0"`) to an emulator transport, for
/// `mount emu <device>`.
pub trait EmuRegistry: Send + Sync {
    fn open_transport(&self, name: &str) -> KResult<Arc<dyn EmuTransport>>;
}
