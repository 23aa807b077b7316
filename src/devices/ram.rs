//! RAM: byte-addressable backing store for instructions and data.
//!
//! Grounded on `riscvemu/src/hart/memory.rs`'s `read_word`/`read_byte`
//! little-endian byte composition, adapted from that file's sparse
//! `HashMap<u64, u8>` storage to a fixed-size dense buffer at a fixed
//! base address.

use std::sync::Mutex;

use crate::bus::{BusError, Device};

#[derive(Debug)]
pub struct Ram {
    data: Mutex<Vec<u8>>,
}

impl Ram {
    pub fn new(size: u64) -> Self {
        Self {
            data: Mutex::new(vec![0; size as usize]),
        }
    }

    /// Bulk-write helper used by the ELF loader to install a segment's
    /// bytes without going through the width-limited `Device::store` path.
    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) -> Result<(), BusError> {
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|&end| end <= data.len())
            .ok_or(BusError::Unmapped(offset))?;
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl Device for Ram {
    fn load(&self, offset: u64, width: u8) -> Result<u64, BusError> {
        let data = self.data.lock().unwrap();
        let start = offset as usize;
        let end = start
            .checked_add(width as usize)
            .filter(|&end| end <= data.len())
            .ok_or(BusError::Unmapped(offset))?;
        let mut value = 0u64;
        for (n, byte) in data[start..end].iter().enumerate() {
            value |= (*byte as u64) << (8 * n);
        }
        Ok(value)
    }

    fn store(&self, offset: u64, width: u8, value: u64) -> Result<(), BusError> {
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        let end = start
            .checked_add(width as usize)
            .filter(|&end| end <= data.len())
            .ok_or(BusError::Unmapped(offset))?;
        for (n, byte) in data[start..end].iter_mut().enumerate() {
            *byte = (value >> (8 * n)) as u8;
        }
        Ok(())
    }

    fn reset(&self) {
        let mut data = self.data.lock().unwrap();
        data.fill(0);
    }
}
