//! GE (Graphics Engine) emulation for oxidized-psp
//!
//! The GE is the PSP's display list processor. Games write 32-bit command
//! words into guest memory; this crate interprets them, mirrors the
//! register file, batches geometry, and decides when buffered draws must
//! be flushed to the backend.

pub mod commands;
pub mod framebuffer;
pub mod gpu;
pub mod list;
pub mod shader;
pub mod state;
pub mod texture;
pub mod transform;
pub mod vertex;

pub use commands::{CommandFlags, CommandTable};
pub use gpu::{GeGpu, GeSnapshot, GpuStats};
pub use list::DisplayList;
pub use shader::{DirtyUniforms, ShaderManager};
pub use state::{GpuState, GpuStateCtx, SkipDrawReason};
