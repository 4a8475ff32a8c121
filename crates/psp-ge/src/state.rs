//! Mirrored GE register file and derived state
//!
//! `GpuState` holds the raw last-written command words plus the matrix
//! files, exactly what the hardware registers hold. `GpuStateCtx` carries
//! values derived from them (decoded floats, computed addresses, dirty
//! flags) that the executor keeps coherent as commands stream through.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::commands::*;

/// Decode the GE's 24-bit float encoding: IEEE-754 single precision with
/// the low 8 mantissa bits zeroed.
#[inline]
pub fn float24(payload: u32) -> f32 {
    f32::from_bits(payload << 8)
}

/// Framebuffer pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferFormat {
    Rgb565 = 0,
    Rgba5551 = 1,
    Rgba4444 = 2,
    Rgba8888 = 3,
}

impl BufferFormat {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => BufferFormat::Rgb565,
            1 => BufferFormat::Rgba5551,
            2 => BufferFormat::Rgba4444,
            _ => BufferFormat::Rgba8888,
        }
    }
}

bitflags! {
    /// Reasons the current frame's primitives are accounted but not drawn
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SkipDrawReason: u32 {
        const SKIPFRAME = 1;
        const NON_DISPLAYED_FB = 2;
    }
}

/// The mirrored register file: one slot per opcode plus the matrix files.
///
/// Slots store the full command word, `(op << 24) | payload`, so a plain
/// XOR against an incoming word yields the payload diff.
#[derive(Clone)]
pub struct GpuState {
    pub cmdmem: [u32; 256],
    pub world_matrix: [f32; 12],
    pub view_matrix: [f32; 12],
    pub proj_matrix: [f32; 16],
    pub tgen_matrix: [f32; 12],
    pub bone_matrix: [f32; 96],
}

impl GpuState {
    pub fn new() -> Self {
        let mut state = Self {
            cmdmem: [0; 256],
            world_matrix: [0.0; 12],
            view_matrix: [0.0; 12],
            proj_matrix: [0.0; 16],
            tgen_matrix: [0.0; 12],
            bone_matrix: [0.0; 96],
        };
        state.reset();
        state
    }

    pub fn reset(&mut self) {
        // Each slot starts as its own opcode with a zero payload.
        for (i, slot) in self.cmdmem.iter_mut().enumerate() {
            *slot = (i as u32) << 24;
        }
        self.world_matrix = [0.0; 12];
        self.view_matrix = [0.0; 12];
        self.proj_matrix = [0.0; 16];
        self.tgen_matrix = [0.0; 12];
        self.bone_matrix = [0.0; 96];
    }

    /// 24-bit payload of a mirrored register.
    #[inline]
    pub fn payload(&self, op: u8) -> u32 {
        self.cmdmem[op as usize] & 0x00FF_FFFF
    }

    pub fn vertex_type(&self) -> u32 {
        self.payload(GE_CMD_VERTEXTYPE)
    }

    pub fn is_antialias_enabled(&self) -> bool {
        self.payload(GE_CMD_ANTIALIASENABLE) & 1 != 0
    }

    pub fn is_lighting_enabled(&self) -> bool {
        self.payload(GE_CMD_LIGHTINGENABLE) & 1 != 0
    }

    pub fn is_light_enabled(&self, light: usize) -> bool {
        self.payload(GE_CMD_LIGHTENABLE0 + light as u8) & 1 != 0
    }

    pub fn is_texture_map_enabled(&self) -> bool {
        self.payload(GE_CMD_TEXTUREMAPENABLE) & 1 != 0
    }

    /// Patch primitive as selected by PATCHPRIMITIVE.
    pub fn patch_primitive(&self) -> u32 {
        self.payload(GE_CMD_PATCHPRIMITIVE) & 3
    }

    pub fn texture_width(&self, level: u8) -> u32 {
        1 << (self.payload(GE_CMD_TEXSIZE0 + level) & 0xF)
    }

    pub fn texture_height(&self, level: u8) -> u32 {
        1 << ((self.payload(GE_CMD_TEXSIZE0 + level) >> 8) & 0xF)
    }

    pub fn texture_address(&self, level: u8) -> u32 {
        let low = self.payload(GE_CMD_TEXADDR0 + level);
        let high = (self.payload(GE_CMD_TEXBUFWIDTH0 + level) << 8) & 0x0F00_0000;
        low | high
    }

    /// CLUT address assembled from CLUTADDR and CLUTADDRUPPER.
    pub fn clut_address(&self) -> u32 {
        let low = self.payload(GE_CMD_CLUTADDR) & 0x00FF_FFF0;
        let high = (self.payload(GE_CMD_CLUTADDRUPPER) << 8) & 0x0F00_0000;
        low | high
    }

    /// Number of CLUT blocks requested by LOADCLUT, 32 bytes each.
    pub fn clut_load_bytes(&self) -> u32 {
        (self.payload(GE_CMD_LOADCLUT) & 0x3F) * 32
    }

    pub fn framebuf_address(&self) -> u32 {
        0x0400_0000 | (self.payload(GE_CMD_FRAMEBUFPTR) & 0x001F_FFF0)
    }

    pub fn framebuf_stride(&self) -> u32 {
        self.payload(GE_CMD_FRAMEBUFWIDTH) & 0x07FC
    }

    pub fn framebuf_format(&self) -> BufferFormat {
        BufferFormat::from_bits(self.payload(GE_CMD_FRAMEBUFPIXFORMAT))
    }

    pub fn region_x2(&self) -> u32 {
        self.payload(GE_CMD_REGION2) & 0x3FF
    }

    pub fn region_y2(&self) -> u32 {
        (self.payload(GE_CMD_REGION2) >> 10) & 0x3FF
    }

    pub fn scissor_x1(&self) -> u32 {
        self.payload(GE_CMD_SCISSOR1) & 0x3FF
    }

    pub fn scissor_y1(&self) -> u32 {
        (self.payload(GE_CMD_SCISSOR1) >> 10) & 0x3FF
    }

    pub fn scissor_x2(&self) -> u32 {
        self.payload(GE_CMD_SCISSOR2) & 0x3FF
    }

    pub fn scissor_y2(&self) -> u32 {
        (self.payload(GE_CMD_SCISSOR2) >> 10) & 0x3FF
    }

    // Block transfer registers. Addresses are split across two commands;
    // strides sit in the upper command's low bits.

    pub fn transfer_src_address(&self) -> u32 {
        (self.payload(GE_CMD_TRANSFERSRC) & 0x00FF_FFF0)
            | ((self.payload(GE_CMD_TRANSFERSRCW) & 0x00FF_0000) << 8)
    }

    pub fn transfer_src_stride(&self) -> u32 {
        self.payload(GE_CMD_TRANSFERSRCW) & 0x07F8
    }

    pub fn transfer_dst_address(&self) -> u32 {
        (self.payload(GE_CMD_TRANSFERDST) & 0x00FF_FFF0)
            | ((self.payload(GE_CMD_TRANSFERDSTW) & 0x00FF_0000) << 8)
    }

    pub fn transfer_dst_stride(&self) -> u32 {
        self.payload(GE_CMD_TRANSFERDSTW) & 0x07F8
    }

    pub fn transfer_src_x(&self) -> u32 {
        self.payload(GE_CMD_TRANSFERSRCPOS) & 0x3FF
    }

    pub fn transfer_src_y(&self) -> u32 {
        (self.payload(GE_CMD_TRANSFERSRCPOS) >> 10) & 0x3FF
    }

    pub fn transfer_dst_x(&self) -> u32 {
        self.payload(GE_CMD_TRANSFERDSTPOS) & 0x3FF
    }

    pub fn transfer_dst_y(&self) -> u32 {
        (self.payload(GE_CMD_TRANSFERDSTPOS) >> 10) & 0x3FF
    }

    pub fn transfer_width(&self) -> u32 {
        (self.payload(GE_CMD_TRANSFERSIZE) & 0x3FF) + 1
    }

    pub fn transfer_height(&self) -> u32 {
        ((self.payload(GE_CMD_TRANSFERSIZE) >> 10) & 0x3FF) + 1
    }

    /// Bytes per pixel of the pending transfer: 32bpp when bit 0 of the
    /// TRANSFERSTART payload is set, 16bpp otherwise.
    pub fn transfer_bpp(&self) -> u32 {
        if self.payload(GE_CMD_TRANSFERSTART) & 1 != 0 {
            4
        } else {
            2
        }
    }
}

impl Default for GpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-light derived floats, decoded from 24-bit payloads as commands land.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LightState {
    pub pos: [f32; 3],
    pub dir: [f32; 3],
    pub att: [f32; 3],
    pub spot_coef: f32,
    pub spot_angle: f32,
    /// Ambient, diffuse, specular, each RGB in [0, 1].
    pub color: [[f32; 3]; 3],
}

/// UV scale/offset decoded from TEXSCALE/TEXOFFSET.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UvScale {
    pub u_scale: f32,
    pub v_scale: f32,
    pub u_off: f32,
    pub v_off: f32,
}

impl Default for UvScale {
    fn default() -> Self {
        Self {
            u_scale: 1.0,
            v_scale: 1.0,
            u_off: 0.0,
            v_off: 0.0,
        }
    }
}

/// Derived GPU state owned by the render thread.
#[derive(Debug, Clone)]
pub struct GpuStateCtx {
    pub vertex_addr: u32,
    pub index_addr: u32,
    /// Relative-address base set by OFFSETADDR or ORIGIN.
    pub offset_addr: u32,
    pub uv: UvScale,
    pub morph_weights: [f32; 8],
    pub lights: [LightState; 4],
    pub cur_texture_width: u32,
    pub cur_texture_height: u32,
    pub texture_changed: bool,
    pub framebuf_changed: bool,
    pub skip_draw_reason: SkipDrawReason,
}

impl GpuStateCtx {
    pub fn new() -> Self {
        Self {
            vertex_addr: 0,
            index_addr: 0,
            offset_addr: 0,
            uv: UvScale::default(),
            morph_weights: [0.0; 8],
            lights: [LightState::default(); 4],
            cur_texture_width: 0,
            cur_texture_height: 0,
            texture_changed: true,
            framebuf_changed: true,
            skip_draw_reason: SkipDrawReason::empty(),
        }
    }

    /// Resolve a 24-bit command payload into a full guest address using the
    /// BASE register's high bits and the current offset.
    #[inline]
    pub fn relative_address(&self, state: &GpuState, data: u32) -> u32 {
        let base = (state.payload(GE_CMD_BASE) << 8) & 0x0F00_0000;
        (base | data).wrapping_add(self.offset_addr)
    }
}

impl Default for GpuStateCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float24_decodes_shifted_bits() {
        // 1.0f32 = 0x3F800000; its top 24 bits are 0x3F8000.
        assert_eq!(float24(0x3F_8000), 1.0);
        assert_eq!(float24(0), 0.0);
        assert_eq!(float24(0xBF_8000), -1.0);
    }

    #[test]
    fn test_mirror_slots_initialized_with_opcode() {
        let state = GpuState::new();
        assert_eq!(state.cmdmem[0x04], 0x0400_0000);
        assert_eq!(state.cmdmem[0xEA], 0xEA00_0000);
        assert_eq!(state.payload(GE_CMD_PRIM), 0);
    }

    #[test]
    fn test_texture_size_is_power_of_two() {
        let mut state = GpuState::new();
        state.cmdmem[GE_CMD_TEXSIZE0 as usize] = ((GE_CMD_TEXSIZE0 as u32) << 24) | (8 << 8) | 9;
        assert_eq!(state.texture_width(0), 512);
        assert_eq!(state.texture_height(0), 256);
    }

    #[test]
    fn test_transfer_register_decoding() {
        let mut state = GpuState::new();
        state.cmdmem[GE_CMD_TRANSFERSRC as usize] =
            ((GE_CMD_TRANSFERSRC as u32) << 24) | 0x80_0000;
        state.cmdmem[GE_CMD_TRANSFERSRCW as usize] =
            ((GE_CMD_TRANSFERSRCW as u32) << 24) | 0x08_0000 | 512;
        assert_eq!(state.transfer_src_address(), 0x0880_0000);
        assert_eq!(state.transfer_src_stride(), 512);

        state.cmdmem[GE_CMD_TRANSFERSIZE as usize] =
            ((GE_CMD_TRANSFERSIZE as u32) << 24) | ((271 << 10) | 479);
        assert_eq!(state.transfer_width(), 480);
        assert_eq!(state.transfer_height(), 272);

        state.cmdmem[GE_CMD_TRANSFERSTART as usize] = ((GE_CMD_TRANSFERSTART as u32) << 24) | 1;
        assert_eq!(state.transfer_bpp(), 4);
    }

    #[test]
    fn test_relative_address_uses_base_and_offset() {
        let state = {
            let mut s = GpuState::new();
            s.cmdmem[GE_CMD_BASE as usize] = ((GE_CMD_BASE as u32) << 24) | 0x08_0000;
            s
        };
        let mut ctx = GpuStateCtx::new();
        assert_eq!(ctx.relative_address(&state, 0x1234), 0x0800_1234);
        ctx.offset_addr = 0x100;
        assert_eq!(ctx.relative_address(&state, 0x1234), 0x0800_1334);
    }
}
