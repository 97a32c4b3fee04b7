//! `quill-menu`: the in-kernel menu/command dispatcher.
//!
//! This is explicitly a collaborator per spec §1 — "the boot-time menu
//! and command dispatcher" is listed as out of scope for the core, with
//! only its interface to the core fixed (§6.3): a semicolon-separated
//! command string, tokenized by whitespace within each command, dispatch
//! through a fixed table whose entries call into the VFS mount table.
//! Ground: `original_source/kern/main/menu.c`.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod dispatch;
pub mod registry;

pub use dispatch::{CommandResult, Menu};

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::sync::Arc;

    use emufs::hw::EmuTransport;
    use hal::dev::{BlockDevice, MemDisk};
    use kernel::vfs::VfsTable;
    use kernel::KResult;
    use kernel::KernelError;
    use sfs::layout::SFS_BLOCKSIZE;

    use crate::registry::{DeviceRegistry, EmuRegistry};
    use crate::Menu;

    /// Hands back a raw, unformatted block device; `mount sfs` itself
    /// exercises `Sfs::mount`, which needs an already-`mksfs`'d volume —
    /// so the registry formats it first, standing in for the user-space
    /// `mksfs` tool this core treats as an external collaborator.
    struct FixedDevices;

    impl DeviceRegistry for FixedDevices {
        fn open_block_device(&self, name: &str) -> KResult<Box<dyn BlockDevice>> {
            if name == "lhd0" {
                let dev = MemDisk::new(SFS_BLOCKSIZE, 64);
                sfs::Sfs::format(Box::new(dev.handle()), "test", 64)?;
                Ok(Box::new(dev.handle()))
            } else {
                Err(KernelError::NotFound)
            }
        }
    }

    struct NoEmu;
    impl EmuRegistry for NoEmu {
        fn open_transport(&self, _name: &str) -> KResult<Arc<dyn EmuTransport>> {
            Err(KernelError::NotFound)
        }
    }

    fn fresh() -> VfsTable {
        hal::cpu::test_support::ensure_platform();
        VfsTable::new()
    }

    #[test]
    fn mount_bootfs_sync_unmount_round_trip() {
        let vfs = fresh();
        let menu = Menu::new(&vfs, &FixedDevices, &NoEmu);

        let results = menu.execute_line("mount sfs lhd0; bootfs lhd0; sync");
        for r in &results {
            assert!(r.result.is_ok(), "{}: {:?}", r.command, r.result);
        }

        let results = menu.execute_line("unmount lhd0");
        assert!(results[0].result.is_ok());
    }

    #[test]
    fn mount_of_unknown_fstype_is_invalid() {
        let vfs = fresh();
        let menu = Menu::new(&vfs, &FixedDevices, &NoEmu);
        let results = menu.execute_line("mount zzz lhd0");
        assert_eq!(results[0].result, Err(KernelError::Invalid));
    }

    #[test]
    fn mount_sem_needs_no_device_registry() {
        let vfs = fresh();
        let menu = Menu::new(&vfs, &FixedDevices, &NoEmu);
        let results = menu.execute_line("mount sem sem0");
        assert!(results[0].result.is_ok());
    }

    #[test]
    fn unknown_command_is_not_found() {
        let vfs = fresh();
        let menu = Menu::new(&vfs, &FixedDevices, &NoEmu);
        let results = menu.execute_line("frobnicate");
        assert_eq!(results[0].result, Err(KernelError::NotFound));
    }

    #[test]
    fn blank_and_whitespace_commands_are_skipped() {
        let vfs = fresh();
        let menu = Menu::new(&vfs, &FixedDevices, &NoEmu);
        let results = menu.execute_line("  ; sync ;  ");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].command, "sync");
    }

    #[test]
    fn p_lists_the_registering_thread() {
        let vfs = fresh();
        kernel::thread::test_support::enter_as_thread(0);
        let menu = Menu::new(&vfs, &FixedDevices, &NoEmu);
        let results = menu.execute_line("p");
        assert!(results[0].result.is_ok());
    }
}
