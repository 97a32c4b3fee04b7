//! Client-side protocol operations, translating the raw
//! handle/offset/iolen/result dance into typed requests and
//! [`KernelError`]s.
//!
//! Ground: `emu_open`/`emu_close`/`emu_read`/`emu_write`/`emu_getsize`/
//! `emu_trunc`/`translate_err` in `emu.c`. Every transfer is still capped
//! at `EMU_MAXIO` bytes per round trip and looped by the caller, exactly
//! as `emufs_read`/`emufs_write` do.
use alloc::string::String;
use alloc::vec::Vec;

use kernel::{KResult, KernelError};

use crate::hw::EmuTransport;
use crate::protocol::*;

/// Maps a raw `REG_RESULT` code to a [`KernelError`]. The three "fatal"
/// codes mean emufs itself made a protocol mistake (bad handle, bad op,
/// bad size) and are unrecoverable programming errors, matching
/// `translate_err`'s `panic` arms.
fn translate(code: u32) -> KResult<()> {
    match code {
        EMU_RES_SUCCESS => Ok(()),
        EMU_RES_BADHANDLE | EMU_RES_BADOP | EMU_RES_BADSIZE => {
            panic!("emufs: fatal result code {}", code)
        }
        EMU_RES_BADPATH => Err(KernelError::NotFound),
        EMU_RES_EXISTS => Err(KernelError::Exists),
        EMU_RES_ISDIR => Err(KernelError::IsDir),
        EMU_RES_MEDIA => Err(KernelError::Io),
        EMU_RES_NOHANDLES => Err(KernelError::TooManyOpenFiles),
        EMU_RES_NOSPACE => Err(KernelError::NoSpace),
        EMU_RES_NOTDIR => Err(KernelError::NotDir),
        EMU_RES_UNKNOWN => Err(KernelError::Io),
        EMU_RES_UNSUPP => Err(KernelError::NotSupported),
        other => panic!("emufs: unknown result code {}", other),
    }
}

/// Opens (or creates) `name` under the directory at `handle`. Ground:
/// `emu_open`. `ENAMETOOLONG` if the path plus its NUL wouldn't fit the
/// shared I/O buffer, same bound the original checks against `EMU_MAXIO`.
pub fn open(
    t: &dyn EmuTransport,
    handle: u32,
    name: &str,
    create: bool,
    excl: bool,
) -> KResult<(u32, bool)> {
    if name.len() + 1 > EMU_MAXIO as usize {
        return Err(KernelError::NameTooLong);
    }
    let op = if create && excl {
        EMU_OP_EXCLCREATE
    } else if create {
        EMU_OP_CREATE
    } else {
        EMU_OP_OPEN
    };

    let buf = t.buffer();
    buf[..name.len()].copy_from_slice(name.as_bytes());
    let txn = t.execute(handle, 0, name.len() as u32, op);
    translate(txn.result)?;
    Ok((txn.handle, txn.iolen > 0))
}

/// Closes a hardware-level handle, retrying a transient media error up
/// to ten times. Ground: `emu_close`.
pub fn close(t: &dyn EmuTransport, handle: u32) -> KResult<()> {
    let mut retries = 0;
    loop {
        let txn = t.execute(handle, 0, 0, EMU_OP_CLOSE);
        match translate(txn.result) {
            Err(KernelError::Io) if retries < 10 => {
                retries += 1;
                continue;
            }
            other => return other,
        }
    }
}

/// Reads up to `buf.len()` bytes starting at `offset`, looping in
/// `EMU_MAXIO`-sized chunks. Ground: `emufs_read`'s `while uio_resid > 0`
/// loop plus `emu_read`'s single-chunk transfer; stops early (short read)
/// at EOF instead of erroring, same as the original.
pub fn read(t: &dyn EmuTransport, handle: u32, offset: u64, buf: &mut [u8]) -> KResult<usize> {
    if offset > u32::MAX as u64 {
        return Ok(0);
    }
    let mut pos = offset as u32;
    let mut done = 0usize;
    while done < buf.len() {
        let want = (buf.len() - done).min(EMU_MAXIO as usize) as u32;
        let txn = t.execute(handle, pos, want, EMU_OP_READ);
        translate(txn.result)?;
        let got = txn.iolen as usize;
        if got == 0 {
            break;
        }
        buf[done..done + got].copy_from_slice(&t.buffer()[..got]);
        done += got;
        pos = txn.offset;
    }
    Ok(done)
}

/// Reads one directory entry at `slot` (the original threads this through
/// a `uio` offset that the device interprets as an entry index). Returns
/// `Ok(None)` once `slot` runs past the last entry, mirroring `emu_doread`
/// returning a zero-length transfer at EOF.
pub fn readdir(t: &dyn EmuTransport, handle: u32, slot: u32) -> KResult<Option<String>> {
    let txn = t.execute(handle, slot, EMU_MAXIO, EMU_OP_READDIR);
    translate(txn.result)?;
    if txn.iolen == 0 {
        return Ok(None);
    }
    let name = String::from_utf8_lossy(&t.buffer()[..txn.iolen as usize]).into_owned();
    Ok(Some(name))
}

/// Writes `buf` at `offset`, looping in `EMU_MAXIO`-sized chunks. Ground:
/// `emufs_write`/`emu_write`. `EFBIG` if `offset` alone is already past
/// what a 32-bit offset register can express.
pub fn write(t: &dyn EmuTransport, handle: u32, offset: u64, buf: &[u8]) -> KResult<usize> {
    if offset > u32::MAX as u64 {
        return Err(KernelError::TooBig);
    }
    let mut pos = offset as u32;
    let mut done = 0usize;
    while done < buf.len() {
        let chunk = (buf.len() - done).min(EMU_MAXIO as usize);
        t.buffer()[..chunk].copy_from_slice(&buf[done..done + chunk]);
        let txn = t.execute(handle, pos, chunk as u32, EMU_OP_WRITE);
        translate(txn.result)?;
        done += chunk;
        pos = txn.offset;
    }
    Ok(done)
}

/// Ground: `emu_getsize`.
pub fn getsize(t: &dyn EmuTransport, handle: u32) -> KResult<u64> {
    let txn = t.execute(handle, 0, 0, EMU_OP_GETSIZE);
    translate(txn.result)?;
    Ok(txn.iolen as u64)
}

/// Ground: `emu_trunc`.
pub fn trunc(t: &dyn EmuTransport, handle: u32, len: u64) -> KResult<()> {
    if len > u32::MAX as u64 {
        return Err(KernelError::TooBig);
    }
    let txn = t.execute(handle, 0, len as u32, EMU_OP_TRUNC);
    translate(txn.result)
}
