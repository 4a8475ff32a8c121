//! Configuration system for the oxidized-psp emulator

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub gpu: GpuConfig,
}

/// General emulator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub start_paused: bool,
    pub confirm_exit: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            start_paused: false,
            confirm_exit: true,
        }
    }
}

/// GPU emulation settings
///
/// The GE core snapshots this at construction; changes made afterwards
/// do not affect a running core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub rendering_mode: RenderingMode,
    /// Bake texture UV scale/offset into decoded vertices.
    pub prescale_uv: bool,
    /// Apply bone weights on the CPU instead of in the vertex shader.
    pub software_skinning: bool,
    pub vsync: bool,
    /// Run the GE core on its own thread, decoupled from the emulated CPU.
    pub separate_gpu_thread: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            rendering_mode: RenderingMode::Buffered,
            prescale_uv: false,
            software_skinning: false,
            vsync: true,
            separate_gpu_thread: false,
        }
    }
}

/// Framebuffer rendering mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum RenderingMode {
    /// Render straight to the backbuffer.
    NonBuffered,
    /// Render to virtual framebuffers and blit at display time.
    #[default]
    Buffered,
}
