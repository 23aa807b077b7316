//! Memory-mapped bus: address-range routing across mounted devices.
//!
//! Generalises `riscvemu/src/hart/memory.rs`'s single flat `Memory` (a
//! `HashMap<u64, u8>` with no notion of device boundaries) into uniform
//! multi-device routing. Devices use interior mutability (`Mutex`/atomics)
//! so the bus can be shared across the hart thread, the CLINT ticker
//! thread and the UART I/O thread.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("no device mounted at address 0x{0:x}")]
    Unmapped(u64),
    #[error("access at 0x{addr:x} of width {width} crosses a device boundary")]
    CrossesDeviceBoundary { addr: u64, width: u8 },
}

/// Uniform load/store/reset contract every addressable device implements.
///
/// `offset` is always relative to the device's own base address (the bus
/// subtracts `base` before forwarding). `width` is one of 1, 2, 4, 8 bytes.
pub trait Device {
    fn load(&self, offset: u64, width: u8) -> Result<u64, BusError>;
    fn store(&self, offset: u64, width: u8, value: u64) -> Result<(), BusError>;
    fn reset(&self);
}

struct Mapping {
    base: u64,
    size: u64,
    device: Arc<dyn Device + Send + Sync>,
}

/// Address-keyed dispatch to memory-mapped devices. At most one mounted
/// device covers any given address; a request that doesn't fit wholly
/// inside one device's window fails.
#[derive(Default)]
pub struct Bus {
    mappings: Vec<Mapping>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `device` at `[base, base + size)`. Panics if the new window
    /// overlaps an already-mounted device: this is a configuration error,
    /// not a runtime condition, and is caught at boot.
    pub fn mount(&mut self, base: u64, size: u64, device: Arc<dyn Device + Send + Sync>) {
        let new_end = base.checked_add(size).expect("device window overflows");
        for existing in &self.mappings {
            let existing_end = existing.base + existing.size;
            if base < existing_end && existing.base < new_end {
                panic!(
                    "device window [0x{base:x}, 0x{new_end:x}) overlaps existing \
                     mapping [0x{:x}, 0x{:x})",
                    existing.base, existing_end
                );
            }
        }
        self.mappings.push(Mapping { base, size, device });
    }

    fn find(&self, addr: u64, width: u8) -> Result<(&Mapping, u64), BusError> {
        let end = addr.checked_add(width as u64).ok_or(BusError::Unmapped(addr))?;
        for mapping in &self.mappings {
            let mapping_end = mapping.base + mapping.size;
            if addr >= mapping.base && addr < mapping_end {
                if end > mapping_end {
                    return Err(BusError::CrossesDeviceBoundary { addr, width });
                }
                return Ok((mapping, addr - mapping.base));
            }
        }
        Err(BusError::Unmapped(addr))
    }

    pub fn load(&self, addr: u64, width: u8) -> Result<u64, BusError> {
        let (mapping, offset) = self.find(addr, width)?;
        mapping.device.load(offset, width)
    }

    pub fn store(&self, addr: u64, width: u8, value: u64) -> Result<(), BusError> {
        let (mapping, offset) = self.find(addr, width)?;
        mapping.device.store(offset, width, value)
    }

    pub fn reset(&self) {
        for mapping in &self.mappings {
            mapping.device.reset();
        }
    }
}
