//! `quill-semfs`: named counting semaphores exposed as files under a
//! single flat `sem:` mount, for testing synchronization primitives from
//! user space without a kernel-level semaphore syscall.
//!
//! Ground: `original_source/kern/fs/semfs/*`, split the same way as the
//! other two filesystems: the semaphore object itself ([`sem`]) and the
//! mounted filesystem's table/directory/vnode-cache state tying it to the
//! VFS ([`fs`], [`vnode`]).
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod fs;
pub mod sem;
pub mod vnode;

pub use fs::{Semfs, SemfsMount};

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use kernel::vfs::{FileType, FsOps, OpenFlags};
    use kernel::thread::test_support::enter_as_thread;
    use kernel::KernelError;

    use crate::{Semfs, SemfsMount};

    fn fresh_mount() -> SemfsMount {
        kernel::test_support::ensure_platform();
        enter_as_thread(0);
        SemfsMount(Semfs::new())
    }

    #[test]
    fn root_is_a_directory_named_sem() {
        let mount = fresh_mount();
        assert_eq!(mount.getvolname(), "sem");
        let root = mount.getroot();
        assert_eq!(root.gettype(), FileType::Directory);
    }

    #[test]
    fn creat_then_write_then_read_back() {
        let mount = fresh_mount();
        let root = mount.getroot();
        let file = root
            .creat("s", OpenFlags::CREAT | OpenFlags::EXCL)
            .unwrap();
        file.write(0, &[0u8; 3]).unwrap();
        assert_eq!(file.stat().unwrap().size, 3);
        let mut buf = [0u8; 2];
        let n = file.read(0, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(file.stat().unwrap().size, 1);
    }

    #[test]
    fn excl_create_on_existing_name_is_eexist() {
        let mount = fresh_mount();
        let root = mount.getroot();
        root.creat("s", OpenFlags::CREAT | OpenFlags::EXCL).unwrap();
        let result = root.creat("s", OpenFlags::CREAT | OpenFlags::EXCL);
        assert_eq!(result.err(), Some(KernelError::Exists));
    }

    #[test]
    fn creat_without_excl_reopens_existing() {
        let mount = fresh_mount();
        let root = mount.getroot();
        root.creat("s", OpenFlags::CREAT | OpenFlags::EXCL)
            .unwrap()
            .write(0, &[0u8; 5])
            .unwrap();
        let reopened = root.creat("s", OpenFlags::CREAT).unwrap();
        assert_eq!(reopened.stat().unwrap().size, 5);
    }

    #[test]
    fn truncate_sets_the_counter() {
        let mount = fresh_mount();
        let root = mount.getroot();
        let file = root.creat("s", OpenFlags::CREAT).unwrap();
        file.truncate(7).unwrap();
        assert_eq!(file.stat().unwrap().size, 7);
    }

    #[test]
    fn write_past_u32_max_is_too_big() {
        let mount = fresh_mount();
        let root = mount.getroot();
        let file = root.creat("s", OpenFlags::CREAT).unwrap();
        file.truncate(u32::MAX).unwrap();
        let result = file.write(0, &[0u8; 1]);
        assert_eq!(result.err(), Some(KernelError::TooBig));
    }

    #[test]
    fn lookup_of_missing_name_is_enoent() {
        let mount = fresh_mount();
        let root = mount.getroot();
        assert_eq!(root.lookup("nope").err(), Some(KernelError::NotFound));
    }

    #[test]
    fn remove_then_lookup_is_enoent() {
        let mount = fresh_mount();
        let root = mount.getroot();
        root.creat("s", OpenFlags::CREAT).unwrap();
        root.remove("s").unwrap();
        assert_eq!(root.lookup("s").err(), Some(KernelError::NotFound));
    }

    #[test]
    fn unmount_with_open_sem_is_ebusy() {
        let mount = fresh_mount();
        let root = mount.getroot();
        let _file = root.creat("s", OpenFlags::CREAT).unwrap();
        assert_eq!(mount.unmount().err(), Some(KernelError::Busy));
    }

    #[test]
    fn unmount_with_nothing_open_succeeds() {
        let mount = fresh_mount();
        {
            let root = mount.getroot();
            root.creat("s", OpenFlags::CREAT).unwrap();
        }
        assert!(mount.unmount().is_ok());
    }

    #[test]
    fn rename_is_not_supported() {
        let mount = fresh_mount();
        let root = mount.getroot();
        root.creat("s", OpenFlags::CREAT).unwrap();
        assert_eq!(
            root.rename("s", "t").err(),
            Some(KernelError::NotSupported)
        );
    }

    /// Ground: spec's sample trace — open with `O_CREAT`, truncate to 0,
    /// one reader blocks until a writer posts one unit, the reader's
    /// offset advances by exactly the amount it consumed.
    #[test]
    fn p_blocks_until_v_posts() {
        let mount = fresh_mount();
        let root = mount.getroot();
        let file = root
            .creat("s", OpenFlags::CREAT | OpenFlags::EXCL)
            .unwrap();
        file.truncate(0).unwrap();

        let reader = file.clone();
        let t = std::thread::spawn(move || {
            enter_as_thread(1);
            let mut buf = [0u8; 1];
            reader.read(0, &mut buf).unwrap();
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        file.write(0, &[0u8; 1]).unwrap();
        t.join().unwrap();
        assert_eq!(file.stat().unwrap().size, 0);
    }
}
