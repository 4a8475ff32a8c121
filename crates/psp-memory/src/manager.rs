//! Memory manager implementation

use parking_lot::RwLock;
use psp_core::error::MemoryError;
use std::sync::Arc;

/// Scratchpad base address
pub const SCRATCHPAD_BASE: u32 = 0x0001_0000;
/// Scratchpad size (16 KiB)
pub const SCRATCHPAD_SIZE: u32 = 0x4000;
/// VRAM base address
pub const VRAM_BASE: u32 = 0x0400_0000;
/// VRAM size (2 MiB)
pub const VRAM_SIZE: u32 = 0x0020_0000;
/// Main RAM base address
pub const RAM_BASE: u32 = 0x0800_0000;
/// Main RAM size (32 MiB)
pub const RAM_SIZE: u32 = 0x0200_0000;

/// Memory region descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    Scratchpad,
    Vram,
    Ram,
}

/// Guest memory for the emulated PSP
///
/// Addresses are normalized before lookup: the kernel and uncached bits
/// are ignored, and VRAM repeats through its 8 MiB window.
pub struct MemoryManager {
    scratchpad: RwLock<Vec<u8>>,
    vram: RwLock<Vec<u8>>,
    ram: RwLock<Vec<u8>>,
}

impl MemoryManager {
    pub fn new() -> Arc<Self> {
        tracing::debug!(
            "Guest memory mapped: {} MiB RAM, {} MiB VRAM, {} KiB scratchpad",
            RAM_SIZE >> 20,
            VRAM_SIZE >> 20,
            SCRATCHPAD_SIZE >> 10
        );
        Arc::new(Self {
            scratchpad: RwLock::new(vec![0; SCRATCHPAD_SIZE as usize]),
            vram: RwLock::new(vec![0; VRAM_SIZE as usize]),
            ram: RwLock::new(vec![0; RAM_SIZE as usize]),
        })
    }

    /// Strip the kernel and uncached address bits.
    #[inline]
    fn normalize(addr: u32) -> u32 {
        addr & 0x3FFF_FFFF
    }

    /// Classify an address, returning its region and byte offset within it.
    fn classify(addr: u32) -> Option<(MemoryRegion, u32)> {
        let addr = Self::normalize(addr);
        if (SCRATCHPAD_BASE..SCRATCHPAD_BASE + SCRATCHPAD_SIZE).contains(&addr) {
            Some((MemoryRegion::Scratchpad, addr - SCRATCHPAD_BASE))
        } else if (addr & 0x3F80_0000) == VRAM_BASE {
            // VRAM mirrors through the whole 0x04000000..0x04800000 window.
            Some((MemoryRegion::Vram, addr & (VRAM_SIZE - 1)))
        } else if (RAM_BASE..RAM_BASE + RAM_SIZE).contains(&addr) {
            Some((MemoryRegion::Ram, addr - RAM_BASE))
        } else {
            None
        }
    }

    pub fn is_valid_address(&self, addr: u32) -> bool {
        Self::classify(addr).is_some()
    }

    pub fn is_ram_address(&self, addr: u32) -> bool {
        matches!(Self::classify(addr), Some((MemoryRegion::Ram, _)))
    }

    pub fn is_vram_address(&self, addr: u32) -> bool {
        matches!(Self::classify(addr), Some((MemoryRegion::Vram, _)))
    }

    fn with_region<R>(
        &self,
        addr: u32,
        size: u32,
        f: impl FnOnce(&RwLock<Vec<u8>>, usize) -> R,
    ) -> Result<R, MemoryError> {
        let (region, offset) = Self::classify(addr).ok_or(MemoryError::InvalidAddress(addr))?;
        let store = match region {
            MemoryRegion::Scratchpad => &self.scratchpad,
            MemoryRegion::Vram => &self.vram,
            MemoryRegion::Ram => &self.ram,
        };
        let len = store.read().len() as u32;
        if offset.checked_add(size).map_or(true, |end| end > len) {
            return Err(MemoryError::RangeCrossesRegion { addr, size });
        }
        Ok(f(store, offset as usize))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&self, addr: u32) -> Result<u32, MemoryError> {
        if addr & 3 != 0 {
            return Err(MemoryError::AlignmentError { addr, align: 4 });
        }
        self.with_region(addr, 4, |store, offset| {
            let data = store.read();
            u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        })
    }

    /// Write a little-endian u32.
    pub fn write_u32(&self, addr: u32, value: u32) -> Result<(), MemoryError> {
        if addr & 3 != 0 {
            return Err(MemoryError::AlignmentError { addr, align: 4 });
        }
        self.with_region(addr, 4, |store, offset| {
            store.write()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        })
    }

    pub fn read_bytes(&self, addr: u32, size: u32) -> Result<Vec<u8>, MemoryError> {
        self.with_region(addr, size, |store, offset| {
            store.read()[offset..offset + size as usize].to_vec()
        })
    }

    pub fn write_bytes(&self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.with_region(addr, data.len() as u32, |store, offset| {
            store.write()[offset..offset + data.len()].copy_from_slice(data);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_classification() {
        let mem = MemoryManager::new();
        assert!(mem.is_valid_address(RAM_BASE));
        assert!(mem.is_valid_address(RAM_BASE + RAM_SIZE - 4));
        assert!(!mem.is_valid_address(RAM_BASE + RAM_SIZE));
        assert!(mem.is_vram_address(VRAM_BASE));
        assert!(mem.is_ram_address(0x0880_0000));
        assert!(!mem.is_valid_address(0x0000_0000));
    }

    #[test]
    fn test_kernel_and_uncached_bits_ignored() {
        let mem = MemoryManager::new();
        mem.write_u32(RAM_BASE, 0xDEAD_BEEF).unwrap();
        assert_eq!(mem.read_u32(0x4800_0000).unwrap(), 0xDEAD_BEEF);
        assert_eq!(mem.read_u32(0x8800_0000).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_vram_mirror() {
        let mem = MemoryManager::new();
        mem.write_u32(VRAM_BASE + 0x100, 0x1234_5678).unwrap();
        assert_eq!(mem.read_u32(VRAM_BASE + VRAM_SIZE + 0x100).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_u32_roundtrip_is_little_endian() {
        let mem = MemoryManager::new();
        mem.write_u32(RAM_BASE + 8, 0x0403_0201).unwrap();
        assert_eq!(mem.read_bytes(RAM_BASE + 8, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unaligned_u32_rejected() {
        let mem = MemoryManager::new();
        assert!(matches!(
            mem.read_u32(RAM_BASE + 2),
            Err(MemoryError::AlignmentError { .. })
        ));
    }

    #[test]
    fn test_range_must_stay_in_region() {
        let mem = MemoryManager::new();
        let last = RAM_BASE + RAM_SIZE - 4;
        assert!(mem.read_bytes(last, 4).is_ok());
        assert!(mem.read_bytes(last, 8).is_err());
    }
}
