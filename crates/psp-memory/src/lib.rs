//! Emulated guest memory for oxidized-psp
//!
//! Provides the byte-addressable PSP address space: main RAM, VRAM and
//! the scratchpad, with validity queries and little-endian accessors.

pub mod manager;

pub use manager::{MemoryManager, MemoryRegion, SCRATCHPAD_BASE, RAM_BASE, RAM_SIZE, VRAM_BASE, VRAM_SIZE};
