//! Core emulator logic for oxidized-psp
//!
//! This crate provides the foundational types, error handling,
//! configuration, and the cross-thread GPU event bridge.

pub mod bridge;
pub mod config;
pub mod error;

pub use bridge::{
    create_gpu_bridge, GpuEvent, GpuEventReceiver, GpuEventSender, InvalidationKind,
};
pub use config::{Config, GpuConfig, RenderingMode};
pub use error::{EmulatorError, MemoryError, Result};
