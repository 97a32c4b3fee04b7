//! The VFS indirection layer: file-objects, filesystem-objects, and the
//! global name table they are mounted under.
//!
//! Redesigned per the ops-table re-architecture flag: rather than a
//! C-style table of function pointers with typed "fail with EISDIR"
//! stubs, a file-object is a two-variant enum matched exhaustively at
//! every entry point, grounded directly on `casys-kaist-KeOS/keos/src/fs.rs`'s
//! `File` enum (`RegularFile`/`Directory`), generalized here to the full
//! capability list spec §3.2 names.
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use hal::spinlock::SpinLock;

use crate::{KResult, KernelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub size: u64,
    pub linkcount: u32,
}

bitflags::bitflags! {
    pub struct OpenFlags: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        const CREAT = 0b100;
        const EXCL = 0b1000;
    }
}

/// Capability set for a non-directory object. Every method either has a
/// real implementation in a concrete filesystem or falls back to one of
/// the typed stub defaults below (`ENOSYS`, mirroring spec §3.2).
pub trait RegularFileOps: Send + Sync {
    fn each_open(&self, _flags: OpenFlags) -> KResult<()> {
        Ok(())
    }
    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize>;
    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize>;
    fn stat(&self) -> KResult<Stat>;
    fn isseekable(&self) -> bool {
        true
    }
    fn fsync(&self) -> KResult<()> {
        Ok(())
    }
    fn truncate(&self, len: u64) -> KResult<()>;
    fn ioctl(&self, _request: u32, _arg: usize) -> KResult<usize> {
        Err(KernelError::NotSupported)
    }
    fn mmap(&self) -> KResult<()> {
        Err(KernelError::NotSupported)
    }
    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
    /// Identifies the concrete filesystem inode backing this object, for
    /// filesystems whose `link` needs to confirm a hard-link target
    /// belongs to the same instance. `None` for every object kind that
    /// doesn't support linking at all.
    fn downcast_ino(&self) -> Option<u32> {
        None
    }
}

/// Capability set for a directory object.
pub trait DirectoryOps: Send + Sync {
    fn each_open(&self, _flags: OpenFlags) -> KResult<()> {
        Ok(())
    }
    fn lookup(&self, name: &str) -> KResult<File>;
    fn getdirentry(&self, slot: u32) -> KResult<String>;
    fn creat(&self, name: &str, flags: OpenFlags) -> KResult<File>;
    fn mkdir(&self, _name: &str) -> KResult<()> {
        Err(KernelError::NotSupported)
    }
    fn symlink(&self, _name: &str, _target: &str) -> KResult<()> {
        Err(KernelError::NotSupported)
    }
    fn link(&self, _name: &str, _target: &Arc<dyn RegularFileOps>) -> KResult<()> {
        Err(KernelError::Invalid)
    }
    fn remove(&self, name: &str) -> KResult<()>;
    fn rmdir(&self, _name: &str) -> KResult<()> {
        Err(KernelError::NotSupported)
    }
    fn rename(&self, old: &str, new: &str) -> KResult<()>;
    fn stat(&self) -> KResult<Stat>;
    fn fsync(&self) -> KResult<()> {
        Ok(())
    }
    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
}

/// A VFS file-object. "Wrong op for kind" is a compile-time-checked arm of
/// the match at each entry point below rather than a runtime stub lookup.
#[derive(Clone)]
pub enum File {
    Regular(Arc<dyn RegularFileOps>),
    Directory(Arc<dyn DirectoryOps>),
}

impl File {
    pub fn gettype(&self) -> FileType {
        match self {
            File::Regular(_) => FileType::Regular,
            File::Directory(_) => FileType::Directory,
        }
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        match self {
            File::Regular(r) => r.read(offset, buf),
            File::Directory(_) => Err(KernelError::IsDir),
        }
    }

    pub fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        match self {
            File::Regular(r) => r.write(offset, buf),
            File::Directory(_) => Err(KernelError::IsDir),
        }
    }

    pub fn truncate(&self, len: u64) -> KResult<()> {
        match self {
            File::Regular(r) => r.truncate(len),
            File::Directory(_) => Err(KernelError::IsDir),
        }
    }

    pub fn stat(&self) -> KResult<Stat> {
        match self {
            File::Regular(r) => r.stat(),
            File::Directory(d) => d.stat(),
        }
    }

    pub fn fsync(&self) -> KResult<()> {
        match self {
            File::Regular(r) => r.fsync(),
            File::Directory(d) => d.fsync(),
        }
    }

    pub fn reclaim(&self) -> KResult<()> {
        match self {
            File::Regular(r) => r.reclaim(),
            File::Directory(d) => d.reclaim(),
        }
    }

    pub fn lookup(&self, name: &str) -> KResult<File> {
        match self {
            File::Directory(d) => d.lookup(name),
            File::Regular(_) => Err(KernelError::NotDir),
        }
    }

    pub fn creat(&self, name: &str, flags: OpenFlags) -> KResult<File> {
        match self {
            File::Directory(d) => d.creat(name, flags),
            File::Regular(_) => Err(KernelError::NotDir),
        }
    }

    pub fn remove(&self, name: &str) -> KResult<()> {
        match self {
            File::Directory(d) => d.remove(name),
            File::Regular(_) => Err(KernelError::NotDir),
        }
    }

    pub fn rename(&self, old: &str, new: &str) -> KResult<()> {
        match self {
            File::Directory(d) => d.rename(old, new),
            File::Regular(_) => Err(KernelError::NotDir),
        }
    }

    pub fn getdirentry(&self, slot: u32) -> KResult<String> {
        match self {
            File::Directory(d) => d.getdirentry(slot),
            File::Regular(_) => Err(KernelError::NotDir),
        }
    }

    pub fn as_regular(&self) -> KResult<&Arc<dyn RegularFileOps>> {
        match self {
            File::Regular(r) => Ok(r),
            File::Directory(_) => Err(KernelError::IsDir),
        }
    }

    pub fn as_directory(&self) -> KResult<&Arc<dyn DirectoryOps>> {
        match self {
            File::Directory(d) => Ok(d),
            File::Regular(_) => Err(KernelError::NotDir),
        }
    }
}

/// A mounted filesystem instance's ops table.
pub trait FsOps: Send + Sync {
    fn sync(&self) -> KResult<()>;
    fn getvolname(&self) -> String;
    fn getroot(&self) -> File;
    fn unmount(&self) -> KResult<()>;
}

/// The global `device-name -> fs-object` mapping, plus a "boot fs" alias
/// used to resolve absolute paths. Every traversal of this table happens
/// under a single coarse lock, the "biglock".
pub struct VfsTable {
    mounts: SpinLock<Vec<(String, Arc<dyn FsOps>)>>,
    boot_fs: SpinLock<Option<Arc<dyn FsOps>>>,
}

impl VfsTable {
    pub const fn new() -> Self {
        VfsTable {
            mounts: SpinLock::new(Vec::new()),
            boot_fs: SpinLock::new(None),
        }
    }

    pub fn mount(&self, name: &str, fs: Arc<dyn FsOps>) -> KResult<()> {
        let mut g = self.mounts.lock();
        if g.iter().any(|(n, _)| n == name) {
            g.unlock();
            return Err(KernelError::Exists);
        }
        g.push((String::from(name), fs));
        g.unlock();
        Ok(())
    }

    pub fn unmount(&self, name: &str) -> KResult<()> {
        let mut g = self.mounts.lock();
        let Some(pos) = g.iter().position(|(n, _)| n == name) else {
            g.unlock();
            return Err(KernelError::NotFound);
        };
        let fs = g[pos].1.clone();
        fs.unmount()?;
        g.remove(pos);
        g.unlock();
        Ok(())
    }

    /// Syncs every mounted filesystem, in mount order. Ground:
    /// `original_source/kern/vfs/vfs_bypass.c`'s `vfs_sync`, which walks
    /// the device list calling each filesystem's `sync` vop. Stops at
    /// the first failure, matching the original's early return.
    pub fn sync_all(&self) -> KResult<()> {
        let g = self.mounts.lock();
        let fses: Vec<Arc<dyn FsOps>> = g.iter().map(|(_, fs)| fs.clone()).collect();
        g.unlock();
        for fs in fses {
            fs.sync()?;
        }
        Ok(())
    }

    pub fn lookup_fs(&self, name: &str) -> KResult<Arc<dyn FsOps>> {
        let g = self.mounts.lock();
        let r = g
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, fs)| fs.clone())
            .ok_or(KernelError::NotFound);
        g.unlock();
        r
    }

    pub fn set_boot_fs(&self, fs: Arc<dyn FsOps>) {
        let mut g = self.boot_fs.lock();
        *g = Some(fs);
        g.unlock();
    }

    pub fn boot_fs(&self) -> KResult<Arc<dyn FsOps>> {
        let g = self.boot_fs.lock();
        let r = g.clone().ok_or(KernelError::NotFound);
        g.unlock();
        r
    }

    /// Resolves `path` starting from `start`. A leading `/` restarts
    /// resolution from the boot filesystem's root, matching spec §4.4.
    pub fn lookup(&self, start: &File, path: &str) -> KResult<File> {
        let mut cur = if let Some(rest) = path.strip_prefix('/') {
            let boot_root = self.boot_fs()?.getroot();
            return self.lookup(&boot_root, rest);
        } else {
            start.clone()
        };
        for component in path.split('/').filter(|c| !c.is_empty()) {
            cur = cur.lookup(component)?;
        }
        Ok(cur)
    }

    /// Returns the parent directory and final name component, used by
    /// modifying ops (`creat`, `remove`, `rename`).
    pub fn lookparent<'a>(&self, start: &File, path: &'a str) -> KResult<(File, &'a str)> {
        let (dir_path, name) = match path.rfind('/') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => ("", path),
        };
        if name.is_empty() {
            return Err(KernelError::Invalid);
        }
        let parent = if dir_path.is_empty() {
            start.clone()
        } else {
            self.lookup(start, dir_path)?
        };
        if parent.gettype() != FileType::Directory {
            return Err(KernelError::NotDir);
        }
        Ok((parent, name))
    }
}

impl Default for VfsTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ensure_platform;

    struct FakeDir {
        entries: SpinLock<Vec<(String, File)>>,
    }

    unsafe impl Send for FakeDir {}
    unsafe impl Sync for FakeDir {}

    impl DirectoryOps for FakeDir {
        fn lookup(&self, name: &str) -> KResult<File> {
            let g = self.entries.lock();
            let r = g
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, f)| f.clone())
                .ok_or(KernelError::NotFound);
            g.unlock();
            r
        }
        fn creat(&self, _name: &str, _flags: OpenFlags) -> KResult<File> {
            Err(KernelError::NotSupported)
        }
        fn remove(&self, name: &str) -> KResult<()> {
            let mut g = self.entries.lock();
            let Some(pos) = g.iter().position(|(n, _)| n == name) else {
                g.unlock();
                return Err(KernelError::NotFound);
            };
            g.remove(pos);
            g.unlock();
            Ok(())
        }
        fn rename(&self, _old: &str, _new: &str) -> KResult<()> {
            Err(KernelError::NotSupported)
        }
        fn getdirentry(&self, _slot: u32) -> KResult<String> {
            Err(KernelError::NotSupported)
        }
        fn stat(&self) -> KResult<Stat> {
            Ok(Stat {
                size: 0,
                linkcount: 1,
            })
        }
    }

    struct FakeFile {
        data: SpinLock<Vec<u8>>,
    }

    unsafe impl Send for FakeFile {}
    unsafe impl Sync for FakeFile {}

    impl RegularFileOps for FakeFile {
        fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
            let g = self.data.lock();
            let off = offset as usize;
            let n = if off >= g.len() {
                0
            } else {
                let n = (g.len() - off).min(buf.len());
                buf[..n].copy_from_slice(&g[off..off + n]);
                n
            };
            g.unlock();
            Ok(n)
        }
        fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
            let mut g = self.data.lock();
            let off = offset as usize;
            if g.len() < off + buf.len() {
                g.resize(off + buf.len(), 0);
            }
            g[off..off + buf.len()].copy_from_slice(buf);
            let n = buf.len();
            g.unlock();
            Ok(n)
        }
        fn stat(&self) -> KResult<Stat> {
            let g = self.data.lock();
            let size = g.len() as u64;
            g.unlock();
            Ok(Stat {
                size,
                linkcount: 1,
            })
        }
        fn truncate(&self, len: u64) -> KResult<()> {
            let mut g = self.data.lock();
            g.resize(len as usize, 0);
            g.unlock();
            Ok(())
        }
    }

    fn make_root() -> File {
        let file = Arc::new(FakeFile {
            data: SpinLock::new(b"hello".to_vec()),
        });
        let root = Arc::new(FakeDir {
            entries: SpinLock::new(vec![(
                "hello".to_string(),
                File::Regular(file as Arc<dyn RegularFileOps>),
            )]),
        });
        File::Directory(root as Arc<dyn DirectoryOps>)
    }

    #[test]
    fn read_on_directory_is_eisdir() {
        ensure_platform();
        let root = make_root();
        let mut buf = [0u8; 8];
        assert_eq!(root.read(0, &mut buf), Err(KernelError::IsDir));
    }

    #[test]
    fn lookup_on_file_is_enotdir() {
        ensure_platform();
        let root = make_root();
        let f = root.lookup("hello").unwrap();
        assert_eq!(f.lookup("x"), Err(KernelError::NotDir));
    }

    #[test]
    fn round_trip_through_lookup() {
        ensure_platform();
        let table = VfsTable::new();
        let root = make_root();
        let fs = Arc::new(FakeFs { root: root.clone() });
        table.set_boot_fs(fs);
        let found = table.lookup(&root, "/hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(found.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    struct FakeFs {
        root: File,
    }
    impl FsOps for FakeFs {
        fn sync(&self) -> KResult<()> {
            Ok(())
        }
        fn getvolname(&self) -> String {
            "fake".into()
        }
        fn getroot(&self) -> File {
            self.root.clone()
        }
        fn unmount(&self) -> KResult<()> {
            Ok(())
        }
    }
}
