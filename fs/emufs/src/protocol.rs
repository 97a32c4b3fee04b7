//! Register layout and op/result codes for the emulator passthrough
//! device.
//!
//! Ground: `original_source/kern/dev/lamebus/emu.c` and
//! `kern/include/lamebus/emu.h` (filtered out of the retrieved corpus, but
//! every constant below is quoted directly in `emu.c`'s `#define`s).
use hal::mmio_registers;

mmio_registers! {
    (REG_HANDLE, 0),
    (REG_OFFSET, 4),
    (REG_IOLEN, 8),
    (REG_OPER, 12),
    (REG_RESULT, 16),
}

/// Offset of the shared I/O buffer within the device's MMIO window.
pub const EMU_BUFFER: usize = 32768;

/// `EMU_MAXIO` and `EMU_ROOTHANDLE` aren't defined anywhere in the
/// filtered source tree (they live in `lamebus/emu.h`, which wasn't
/// retrieved); these are System/161's well-known real values, used here
/// as a documented assumption rather than an invented one.
pub const EMU_MAXIO: u32 = 4096;
pub const EMU_ROOTHANDLE: u32 = 0;

pub const EMU_OP_OPEN: u32 = 1;
pub const EMU_OP_CREATE: u32 = 2;
pub const EMU_OP_EXCLCREATE: u32 = 3;
pub const EMU_OP_CLOSE: u32 = 4;
pub const EMU_OP_READ: u32 = 5;
pub const EMU_OP_READDIR: u32 = 6;
pub const EMU_OP_WRITE: u32 = 7;
pub const EMU_OP_GETSIZE: u32 = 8;
pub const EMU_OP_TRUNC: u32 = 9;

pub const EMU_RES_SUCCESS: u32 = 1;
pub const EMU_RES_BADHANDLE: u32 = 2;
pub const EMU_RES_BADOP: u32 = 3;
pub const EMU_RES_BADPATH: u32 = 4;
pub const EMU_RES_BADSIZE: u32 = 5;
pub const EMU_RES_EXISTS: u32 = 6;
pub const EMU_RES_ISDIR: u32 = 7;
pub const EMU_RES_MEDIA: u32 = 8;
pub const EMU_RES_NOHANDLES: u32 = 9;
pub const EMU_RES_NOSPACE: u32 = 10;
pub const EMU_RES_NOTDIR: u32 = 11;
pub const EMU_RES_UNKNOWN: u32 = 12;
pub const EMU_RES_UNSUPP: u32 = 13;
