//! Error types for the oxidized-psp emulator

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Guest-memory errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Invalid address: 0x{0:08x}")]
    InvalidAddress(u32),

    #[error("Range 0x{addr:08x}..+0x{size:x} crosses a region boundary")]
    RangeCrossesRegion { addr: u32, size: u32 },

    #[error("Alignment error: address 0x{addr:08x} not aligned to {align}")]
    AlignmentError { addr: u32, align: u32 },
}

/// Convenience result type
pub type Result<T> = std::result::Result<T, EmulatorError>;
