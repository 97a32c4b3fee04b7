//! The hardware-facing half of the protocol: writing the register block
//! and waiting for the "device" to post a result.
//!
//! Ground: `emu_rreg`/`emu_wreg`/`emu_irq`/`emu_waitdone` in `emu.c`. The
//! original completes a transaction asynchronously (write registers, take
//! an interrupt, post a semaphore the waiter blocks on); this workspace
//! has no interrupt-to-semaphore wiring for a device this simple, so
//! [`MmioTransport`] completes synchronously: write the registers, then
//! poll `REG_RESULT` until it's nonzero. Functionally equivalent from the
//! caller's point of view (`execute` still blocks until the "hardware"
//! is done), simpler without a working interrupt controller to hang it
//! off of.
use crate::protocol::*;
use hal::dev::mmio::ActiveMmioArea;

/// One request/response round trip with the emulator passthrough device.
pub trait EmuTransport: Send + Sync {
    /// Writes handle/offset/iolen/op, then blocks until the device posts
    /// a result. Returns the raw result code plus whatever the device
    /// wrote back into handle/iolen/offset (used by open, read, and
    /// getsize respectively).
    fn execute(&self, handle: u32, offset: u32, iolen: u32, op: u32) -> Transaction;

    /// The shared I/O buffer used to stage read/write payloads and
    /// path strings.
    fn buffer(&self) -> &mut [u8];
}

#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    pub result: u32,
    pub handle: u32,
    pub iolen: u32,
    pub offset: u32,
}

pub struct MmioTransport {
    area: ActiveMmioArea,
}

impl MmioTransport {
    /// # Safety
    /// `area` must be the live MMIO window of an emulator passthrough
    /// device, mapped for the lifetime of the returned value.
    pub unsafe fn new(area: ActiveMmioArea) -> Self {
        MmioTransport { area }
    }
}

impl EmuTransport for MmioTransport {
    fn execute(&self, handle: u32, offset: u32, iolen: u32, op: u32) -> Transaction {
        let reg_handle = self.area.accessor::<u32>(REG_HANDLE);
        let reg_offset = self.area.accessor::<u32>(REG_OFFSET);
        let reg_iolen = self.area.accessor::<u32>(REG_IOLEN);
        let reg_oper = self.area.accessor::<u32>(REG_OPER);
        let reg_result = self.area.accessor::<u32>(REG_RESULT);

        reg_handle.write(handle);
        reg_offset.write(offset);
        reg_iolen.write(iolen);
        reg_result.write(0);
        reg_oper.write(op);

        loop {
            let result = reg_result.read();
            if result != 0 {
                reg_result.write(0);
                return Transaction {
                    result,
                    handle: reg_handle.read(),
                    iolen: reg_iolen.read(),
                    offset: reg_offset.read(),
                };
            }
            core::hint::spin_loop();
        }
    }

    fn buffer(&self) -> &mut [u8] {
        self.area.bytes(EMU_BUFFER, EMU_MAXIO as usize)
    }
}

#[cfg(test)]
pub mod fake {
    //! A host-side stand-in for the "hardware" emulator, playing the role
    //! `sys161`'s emulator passthrough support plays for the real device:
    //! a tiny in-memory filesystem addressed by handle, so
    //! `quill-emufs`'s client logic can be exercised without real MMIO.
    use super::{EmuTransport, Transaction};
    use crate::protocol::*;
    use alloc::collections::BTreeMap;
    use alloc::string::String;
    use alloc::vec::Vec;
    use hal::spinlock::SpinLock;

    struct Node {
        is_dir: bool,
        data: Vec<u8>,
        children: BTreeMap<String, u32>,
    }

    pub struct FakeTransport {
        state: SpinLock<FakeState>,
    }

    struct FakeState {
        nodes: BTreeMap<u32, Node>,
        next_handle: u32,
        buffer: Vec<u8>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            let mut nodes = BTreeMap::new();
            nodes.insert(
                EMU_ROOTHANDLE,
                Node {
                    is_dir: true,
                    data: Vec::new(),
                    children: BTreeMap::new(),
                },
            );
            FakeTransport {
                state: SpinLock::new(FakeState {
                    nodes,
                    next_handle: EMU_ROOTHANDLE + 1,
                    buffer: alloc::vec![0u8; EMU_MAXIO as usize],
                }),
            }
        }

        fn path_from_buffer(buf: &[u8], iolen: u32) -> String {
            String::from_utf8_lossy(&buf[..iolen as usize]).into_owned()
        }
    }

    impl EmuTransport for FakeTransport {
        fn execute(&self, handle: u32, offset: u32, iolen: u32, op: u32) -> Transaction {
            let mut g = self.state.lock();
            let t = run(&mut g, handle, offset, iolen, op);
            g.unlock();
            t
        }

        fn buffer(&self) -> &mut [u8] {
            let g = self.state.lock();
            let ptr = g.buffer.as_ptr() as *mut u8;
            let len = g.buffer.len();
            g.unlock();
            unsafe { core::slice::from_raw_parts_mut(ptr, len) }
        }
    }

    fn run(state: &mut FakeState, handle: u32, offset: u32, iolen: u32, op: u32) -> Transaction {
        let ok = |handle, iolen, offset| Transaction {
            result: EMU_RES_SUCCESS,
            handle,
            iolen,
            offset,
        };
        let err = |code| Transaction {
            result: code,
            handle,
            iolen,
            offset,
        };

        match op {
            EMU_OP_OPEN | EMU_OP_CREATE | EMU_OP_EXCLCREATE => {
                let name = FakeTransport::path_from_buffer(&state.buffer, iolen);
                let Some(dir) = state.nodes.get(&handle) else {
                    return err(EMU_RES_BADHANDLE);
                };
                if !dir.is_dir {
                    return err(EMU_RES_NOTDIR);
                }
                if let Some(&existing) = dir.children.get(&name) {
                    if op == EMU_OP_EXCLCREATE {
                        return err(EMU_RES_EXISTS);
                    }
                    let isdir = state.nodes.get(&existing).unwrap().is_dir;
                    return ok(existing, if isdir { 1 } else { 0 }, offset);
                }
                if op == EMU_OP_OPEN {
                    return err(EMU_RES_BADPATH);
                }
                let new_handle = state.next_handle;
                state.next_handle += 1;
                state.nodes.insert(
                    new_handle,
                    Node {
                        is_dir: false,
                        data: Vec::new(),
                        children: BTreeMap::new(),
                    },
                );
                state
                    .nodes
                    .get_mut(&handle)
                    .unwrap()
                    .children
                    .insert(name, new_handle);
                ok(new_handle, 0, offset)
            }
            EMU_OP_CLOSE => {
                if !state.nodes.contains_key(&handle) {
                    return err(EMU_RES_BADHANDLE);
                }
                ok(handle, iolen, offset)
            }
            EMU_OP_READ => {
                let Some(node) = state.nodes.get(&handle) else {
                    return err(EMU_RES_BADHANDLE);
                };
                if node.is_dir {
                    return err(EMU_RES_ISDIR);
                }
                let off = offset as usize;
                let n = if off >= node.data.len() {
                    0
                } else {
                    (node.data.len() - off).min(iolen as usize)
                };
                let bytes = node.data[off..off + n].to_vec();
                state.buffer[..n].copy_from_slice(&bytes);
                ok(handle, n as u32, offset + n as u32)
            }
            EMU_OP_READDIR => {
                let Some(node) = state.nodes.get(&handle) else {
                    return err(EMU_RES_BADHANDLE);
                };
                if !node.is_dir {
                    return err(EMU_RES_NOTDIR);
                }
                let name = match node.children.keys().nth(offset as usize) {
                    Some(n) => n.clone(),
                    None => return ok(handle, 0, offset),
                };
                let bytes = name.as_bytes();
                state.buffer[..bytes.len()].copy_from_slice(bytes);
                ok(handle, bytes.len() as u32, offset + 1)
            }
            EMU_OP_WRITE => {
                let off = offset as usize;
                let payload = state.buffer[..iolen as usize].to_vec();
                let Some(node) = state.nodes.get_mut(&handle) else {
                    return err(EMU_RES_BADHANDLE);
                };
                if node.is_dir {
                    return err(EMU_RES_ISDIR);
                }
                if node.data.len() < off + payload.len() {
                    node.data.resize(off + payload.len(), 0);
                }
                node.data[off..off + payload.len()].copy_from_slice(&payload);
                ok(handle, iolen, offset + iolen)
            }
            EMU_OP_GETSIZE => {
                let Some(node) = state.nodes.get(&handle) else {
                    return err(EMU_RES_BADHANDLE);
                };
                let size = if node.is_dir {
                    node.children.len() as u32
                } else {
                    node.data.len() as u32
                };
                ok(handle, size, offset)
            }
            EMU_OP_TRUNC => {
                let Some(node) = state.nodes.get_mut(&handle) else {
                    return err(EMU_RES_BADHANDLE);
                };
                if node.is_dir {
                    return err(EMU_RES_ISDIR);
                }
                node.data.resize(iolen as usize, 0);
                ok(handle, iolen, offset)
            }
            _ => err(EMU_RES_BADOP),
        }
    }
}
