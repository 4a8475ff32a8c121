//! The GE core: fast interpreter loop, opcode executor and lifecycle
//!
//! Commands stream out of guest memory millions of times per frame. The
//! loop here does the minimum per word: one flag lookup, one XOR against
//! the mirror, a predictable flush branch, and an executor call only for
//! opcodes that carry semantics. Everything heavier hangs off the
//! executor's 256-way dispatch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use psp_core::bridge::{GpuEvent, GpuEventReceiver, InvalidationKind};
use psp_core::config::{Config, GpuConfig, RenderingMode};
use psp_memory::MemoryManager;

use crate::commands::*;
use crate::framebuffer::{FramebufferInfo, FramebufferManager};
use crate::list::{DisplayList, CALL_STACK_DEPTH};
use crate::shader::{DirtyUniforms, ShaderManager};
use crate::state::{float24, BufferFormat, GpuState, GpuStateCtx, LightState, SkipDrawReason, UvScale};
use crate::texture::TextureCache;
use crate::transform::{PatchPrimType, PrimitiveType, TransformPipeline};
use crate::vertex;

/// Counters polled by the frontend each frame.
#[derive(Debug, Clone, Default)]
pub struct GpuStats {
    pub vertex_gpu_cycles: u64,
    pub num_flushes: u32,
    pub num_draw_calls: u32,
    pub num_vertex_shaders: usize,
    pub num_fragment_shaders: usize,
    pub num_shaders: usize,
    pub num_textures: usize,
    pub num_vfbs: usize,
}

/// Serialized form of the core's own state: the raw register mirror, the
/// matrix files, and the derived per-light/UV/morph caches. Subsystem
/// internals are deliberately not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeSnapshot {
    pub cmdmem: Vec<u32>,
    pub world_matrix: Vec<f32>,
    pub view_matrix: Vec<f32>,
    pub proj_matrix: Vec<f32>,
    pub tgen_matrix: Vec<f32>,
    pub bone_matrix: Vec<f32>,
    pub lights: [LightState; 4],
    pub uv: UvScale,
    pub morph_weights: [f32; 8],
    pub vertex_addr: u32,
    pub index_addr: u32,
    pub offset_addr: u32,
    pub cur_texture_width: u32,
    pub cur_texture_height: u32,
}

/// One latch per log-worthy anomaly; games hit these every frame once
/// they hit them at all.
#[derive(Default)]
struct ReportOnce {
    bad_vertex_addr: bool,
    bad_index_addr: bool,
    unexpected_prim: bool,
    unsupported_patch: bool,
    indexed_bbox: bool,
    bad_bbox: bool,
    alpha_test_mask: bool,
    antialias: bool,
    tex_lod_slope: bool,
    tex_level: bool,
    unknown_cmd: bool,
    bad_transfer: bool,
    bad_jump: bool,
    call_stack: bool,
}

/// The render-thread half of the GE.
///
/// Owns the mirrored register file and every downstream subsystem; the
/// emulated CPU only talks to it through guest memory and the event
/// bridge.
pub struct GeGpu {
    config: GpuConfig,
    memory: Arc<MemoryManager>,
    table: CommandTable,
    pub state: GpuState,
    pub ctx: GpuStateCtx,
    pub shaders: ShaderManager,
    pub textures: TextureCache,
    pub framebuffers: FramebufferManager,
    pub transform: TransformPipeline,
    pub stats: GpuStats,
    pub cycles_executed: u64,
    events: GpuEventReceiver,
    vsync_interval: i32,
    reported: ReportOnce,
}

impl GeGpu {
    pub fn new(memory: Arc<MemoryManager>, config: &Config, events: GpuEventReceiver) -> Self {
        let gpu_config = config.gpu.clone();
        events.connect();
        Self {
            table: CommandTable::new(&gpu_config),
            state: GpuState::new(),
            ctx: GpuStateCtx::new(),
            shaders: ShaderManager::new(),
            textures: TextureCache::new(Arc::clone(&memory)),
            framebuffers: FramebufferManager::new(Arc::clone(&memory), gpu_config.rendering_mode),
            transform: TransformPipeline::new(Arc::clone(&memory)),
            stats: GpuStats::default(),
            cycles_executed: 0,
            events,
            vsync_interval: if gpu_config.vsync { 1 } else { 0 },
            reported: ReportOnce::default(),
            config: gpu_config,
            memory,
        }
    }

    /// Ask the draw engine to submit everything it has buffered.
    #[inline]
    fn flush(&mut self) {
        self.transform.flush(
            &self.state,
            &mut self.ctx,
            &mut self.shaders,
            &mut self.textures,
        );
    }

    /// Interpret commands from the list until its downcount runs out, a
    /// control-flow command ends it, or the pc leaves valid memory.
    ///
    /// The loop writes the mirror unconditionally even on a zero diff: the
    /// store is cheaper than a mispredicted branch, and games re-emit
    /// identical state constantly.
    pub fn run_list(&mut self, list: &mut DisplayList) {
        while list.downcount > 0 {
            // Lifecycle events only ever run between opcodes.
            if self.events.has_pending() {
                self.process_pending_events();
            }

            let word = match self.memory.read_u32(list.pc) {
                Ok(word) => word,
                Err(err) => {
                    tracing::error!("Display list pc left valid memory: {}", err);
                    list.finished = true;
                    break;
                }
            };
            let op = (word >> 24) as u8;
            let flags = self.table.flags(op);
            let diff = word ^ self.state.cmdmem[op as usize];

            if flags.contains(CommandFlags::FLUSH_BEFORE)
                || (diff != 0 && flags.contains(CommandFlags::FLUSH_BEFORE_ON_CHANGE))
            {
                self.flush();
            }

            self.state.cmdmem[op as usize] = word;

            if flags.intersects(CommandFlags::ANY_EXECUTE) {
                self.execute_op(list, word, diff);
            }

            list.pc = list.pc.wrapping_add(4);
            list.downcount -= 1;
            if list.finished {
                break;
            }
        }
    }

    /// Single-command entry point for callers outside the fast loop.
    pub fn execute_command(&mut self, list: &mut DisplayList, word: u32) {
        let op = (word >> 24) as u8;
        let flags = self.table.flags(op);
        let diff = word ^ self.state.cmdmem[op as usize];
        if flags.contains(CommandFlags::FLUSH_BEFORE)
            || (diff != 0 && flags.contains(CommandFlags::FLUSH_BEFORE_ON_CHANGE))
        {
            self.flush();
        }
        self.state.cmdmem[op as usize] = word;
        if flags.intersects(CommandFlags::ANY_EXECUTE) {
            self.execute_op(list, word, diff);
        }
    }

    /// Per-opcode semantics. The loop has already flushed as the flag
    /// table demanded and written the mirror; `diff` carries the XOR
    /// against the previous word for the change-gated opcodes.
    fn execute_op(&mut self, list: &mut DisplayList, word: u32, diff: u32) {
        let op = (word >> 24) as u8;
        let data = word & 0x00FF_FFFF;

        match op {
            GE_CMD_BASE => {}

            GE_CMD_VADDR => {
                self.ctx.vertex_addr = self.ctx.relative_address(&self.state, data);
            }

            GE_CMD_IADDR => {
                self.ctx.index_addr = self.ctx.relative_address(&self.state, data);
            }

            GE_CMD_OFFSETADDR => {
                self.ctx.offset_addr = data << 8;
            }

            GE_CMD_ORIGIN => {
                self.ctx.offset_addr = list.pc;
            }

            GE_CMD_PRIM => self.cmd_prim(data),
            GE_CMD_BEZIER => self.cmd_bezier(data),
            GE_CMD_SPLINE => self.cmd_spline(data),
            GE_CMD_BOUNDINGBOX => self.cmd_bounding_box(list, data),

            GE_CMD_JUMP => {
                let target = self.ctx.relative_address(&self.state, data & 0xFF_FFFC);
                if self.memory.is_valid_address(target) {
                    list.pc = target.wrapping_sub(4);
                } else if !self.reported.bad_jump {
                    self.reported.bad_jump = true;
                    tracing::error!("JUMP to invalid address {:#010x}", target);
                }
            }

            GE_CMD_CALL => {
                let target = self.ctx.relative_address(&self.state, data & 0xFF_FFFC);
                if list.stack_ptr >= CALL_STACK_DEPTH {
                    if !self.reported.call_stack {
                        self.reported.call_stack = true;
                        tracing::error!("CALL: display list stack overflow");
                    }
                } else if self.memory.is_valid_address(target) {
                    list.call_stack[list.stack_ptr] = list.pc.wrapping_add(4);
                    list.stack_ptr += 1;
                    list.pc = target.wrapping_sub(4);
                } else if !self.reported.bad_jump {
                    self.reported.bad_jump = true;
                    tracing::error!("CALL to invalid address {:#010x}", target);
                }
            }

            GE_CMD_RET => {
                if list.stack_ptr == 0 {
                    if !self.reported.call_stack {
                        self.reported.call_stack = true;
                        tracing::error!("RET with empty display list stack");
                    }
                } else {
                    list.stack_ptr -= 1;
                    list.pc = list.call_stack[list.stack_ptr].wrapping_sub(4);
                }
            }

            GE_CMD_BJUMP => {
                // Taken when the bounding box fell outside the region.
                if !list.bbox_result {
                    let target = self.ctx.relative_address(&self.state, data & 0xFF_FFFC);
                    if self.memory.is_valid_address(target) {
                        list.pc = target.wrapping_sub(4);
                    } else if !self.reported.bad_jump {
                        self.reported.bad_jump = true;
                        tracing::error!("BJUMP to invalid address {:#010x}", target);
                    }
                }
            }

            GE_CMD_SIGNAL | GE_CMD_FINISH => {
                tracing::trace!("{} {:#08x}", if op == GE_CMD_SIGNAL { "SIGNAL" } else { "FINISH" }, data);
            }

            GE_CMD_END => {
                list.finished = true;
            }

            GE_CMD_VERTEXTYPE => self.cmd_vertex_type(diff),

            GE_CMD_REGION1 | GE_CMD_REGION2 | GE_CMD_SCISSOR1 | GE_CMD_SCISSOR2 => {
                if diff != 0 {
                    self.ctx.framebuf_changed = true;
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_FRAMEBUFPTR | GE_CMD_FRAMEBUFWIDTH | GE_CMD_FRAMEBUFPIXFORMAT => {
                if diff != 0 {
                    self.ctx.framebuf_changed = true;
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_VIEWPORTX1 | GE_CMD_VIEWPORTY1 | GE_CMD_VIEWPORTZ1 | GE_CMD_VIEWPORTX2
            | GE_CMD_VIEWPORTY2 | GE_CMD_VIEWPORTZ2 => {
                if diff != 0 {
                    self.ctx.framebuf_changed = true;
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_TEXTUREMAPENABLE => {
                if diff != 0 {
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_FOGCOLOR => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::FOGCOLOR);
                }
            }

            GE_CMD_FOG1 | GE_CMD_FOG2 => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::FOGCOEF);
                }
            }

            GE_CMD_TEXSCALEU => {
                if diff != 0 {
                    self.ctx.uv.u_scale = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
                }
            }

            GE_CMD_TEXSCALEV => {
                if diff != 0 {
                    self.ctx.uv.v_scale = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
                }
            }

            GE_CMD_TEXOFFSETU => {
                if diff != 0 {
                    self.ctx.uv.u_off = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
                }
            }

            GE_CMD_TEXOFFSETV => {
                if diff != 0 {
                    self.ctx.uv.v_off = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
                }
            }

            GE_CMD_TEXADDR0..=GE_CMD_TEXADDR7 => {
                if diff != 0 {
                    self.ctx.texture_changed = true;
                    self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
                }
            }

            GE_CMD_TEXBUFWIDTH0..=GE_CMD_TEXBUFWIDTH7 => {
                if diff != 0 {
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_CLUTADDR | GE_CMD_CLUTADDRUPPER => {
                // LOADCLUT is what actually changes the palette.
            }

            GE_CMD_CLUTFORMAT => {
                if diff != 0 {
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_LOADCLUT => {
                self.ctx.texture_changed = true;
                let addr = self.state.clut_address();
                let bytes = self.state.clut_load_bytes();
                self.textures.load_clut(addr, bytes);
            }

            GE_CMD_TEXMAPMODE => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
                }
            }

            GE_CMD_TRANSFERSTART => {
                self.do_block_transfer();
                // The transfer may have overwritten the current texture.
                self.ctx.texture_changed = true;
            }

            GE_CMD_TEXSIZE0 => {
                // Render-to-texture may have overridden the size; only
                // recompute when the register or the texture changed.
                if diff != 0 || self.ctx.texture_changed {
                    self.ctx.cur_texture_width = self.state.texture_width(0);
                    self.ctx.cur_texture_height = self.state.texture_height(0);
                    self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_TEXSIZE1..=GE_CMD_TEXSIZE7 => {
                if diff != 0 {
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_TEXMODE | GE_CMD_TEXFORMAT | GE_CMD_TEXFILTER | GE_CMD_TEXWRAP => {
                if diff != 0 {
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_AMBIENTCOLOR | GE_CMD_AMBIENTALPHA => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::AMBIENT);
                }
            }

            GE_CMD_MATERIALDIFFUSE => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::MATDIFFUSE);
                }
            }

            GE_CMD_MATERIALEMISSIVE => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::MATEMISSIVE);
                }
            }

            GE_CMD_MATERIALAMBIENT | GE_CMD_MATERIALALPHA => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::MATAMBIENTALPHA);
                }
            }

            GE_CMD_MATERIALSPECULAR | GE_CMD_MATERIALSPECULARCOEF => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::MATSPECULAR);
                }
            }

            GE_CMD_LX0..=GE_CMD_LZ3 => {
                if diff != 0 {
                    let n = (op - GE_CMD_LX0) as usize;
                    let (light, coord) = (n / 3, n % 3);
                    self.ctx.lights[light].pos[coord] = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::light(light));
                }
            }

            GE_CMD_LDX0..=GE_CMD_LDZ3 => {
                if diff != 0 {
                    let n = (op - GE_CMD_LDX0) as usize;
                    let (light, coord) = (n / 3, n % 3);
                    self.ctx.lights[light].dir[coord] = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::light(light));
                }
            }

            GE_CMD_LKA0..=GE_CMD_LKC3 => {
                if diff != 0 {
                    let n = (op - GE_CMD_LKA0) as usize;
                    let (light, coord) = (n / 3, n % 3);
                    self.ctx.lights[light].att[coord] = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::light(light));
                }
            }

            GE_CMD_LKS0..=GE_CMD_LKS3 => {
                if diff != 0 {
                    let light = (op - GE_CMD_LKS0) as usize;
                    self.ctx.lights[light].spot_coef = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::light(light));
                }
            }

            GE_CMD_LKO0..=GE_CMD_LKO3 => {
                if diff != 0 {
                    let light = (op - GE_CMD_LKO0) as usize;
                    self.ctx.lights[light].spot_angle = float24(data);
                    self.shaders.dirty_uniform(DirtyUniforms::light(light));
                }
            }

            GE_CMD_LAC0..=GE_CMD_LSC3 => {
                if diff != 0 {
                    let r = (data & 0xFF) as f32 * (1.0 / 255.0);
                    let g = ((data >> 8) & 0xFF) as f32 * (1.0 / 255.0);
                    let b = (data >> 16) as f32 * (1.0 / 255.0);
                    let n = (op - GE_CMD_LAC0) as usize;
                    let (light, channel) = (n / 3, n % 3);
                    self.ctx.lights[light].color[channel] = [r, g, b];
                    self.shaders.dirty_uniform(DirtyUniforms::light(light));
                }
            }

            GE_CMD_COLORTEST | GE_CMD_COLORTESTMASK => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::COLORMASK);
                }
            }

            GE_CMD_ALPHATEST => {
                if ((data >> 16) & 0xFF) != 0xFF
                    && (data & 7) > 1
                    && !self.reported.alpha_test_mask
                {
                    self.reported.alpha_test_mask = true;
                    tracing::warn!("Unsupported alpha test mask: {:02x}", (data >> 16) & 0xFF);
                }
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::ALPHACOLORREF);
                }
            }

            GE_CMD_COLORREF => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::ALPHACOLORREF);
                }
            }

            GE_CMD_TEXENVCOLOR => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::TEXENV);
                }
            }

            GE_CMD_STENCILTEST => {
                if diff != 0 {
                    self.shaders.dirty_uniform(DirtyUniforms::STENCILREPLACEVALUE);
                }
            }

            GE_CMD_MORPHWEIGHT0..=GE_CMD_MORPHWEIGHT7 => {
                if diff != 0 {
                    let index = (op - GE_CMD_MORPHWEIGHT0) as usize;
                    self.ctx.morph_weights[index] = float24(data);
                }
            }

            GE_CMD_WORLDMATRIXNUMBER => {
                self.state.cmdmem[op as usize] &= 0xFF00_000F;
            }
            GE_CMD_WORLDMATRIXDATA => {
                self.matrix_data_4x3(
                    GE_CMD_WORLDMATRIXNUMBER,
                    |state| &mut state.world_matrix,
                    DirtyUniforms::WORLDMATRIX,
                    data,
                );
            }

            GE_CMD_VIEWMATRIXNUMBER => {
                self.state.cmdmem[op as usize] &= 0xFF00_000F;
            }
            GE_CMD_VIEWMATRIXDATA => {
                self.matrix_data_4x3(
                    GE_CMD_VIEWMATRIXNUMBER,
                    |state| &mut state.view_matrix,
                    DirtyUniforms::VIEWMATRIX,
                    data,
                );
            }

            GE_CMD_PROJMATRIXNUMBER => {
                self.state.cmdmem[op as usize] &= 0xFF00_000F;
            }
            GE_CMD_PROJMATRIXDATA => {
                let num = (self.state.cmdmem[GE_CMD_PROJMATRIXNUMBER as usize] & 0xF) as usize;
                let new_val = data << 8;
                if new_val != self.state.proj_matrix[num].to_bits() {
                    self.flush();
                    self.state.proj_matrix[num] = f32::from_bits(new_val);
                    self.shaders.dirty_uniform(DirtyUniforms::PROJMATRIX);
                }
                self.state.cmdmem[GE_CMD_PROJMATRIXNUMBER as usize] =
                    ((GE_CMD_PROJMATRIXNUMBER as u32) << 24) | ((num as u32 + 1) & 0xF);
            }

            GE_CMD_TGENMATRIXNUMBER => {
                self.state.cmdmem[op as usize] &= 0xFF00_000F;
            }
            GE_CMD_TGENMATRIXDATA => {
                self.matrix_data_4x3(
                    GE_CMD_TGENMATRIXNUMBER,
                    |state| &mut state.tgen_matrix,
                    DirtyUniforms::TEXMATRIX,
                    data,
                );
            }

            GE_CMD_BONEMATRIXNUMBER => {
                self.state.cmdmem[op as usize] &= 0xFF00_007F;
            }
            GE_CMD_BONEMATRIXDATA => {
                let num = (self.state.cmdmem[GE_CMD_BONEMATRIXNUMBER as usize] & 0x7F) as usize;
                let new_val = data << 8;
                if num < 96 && new_val != self.state.bone_matrix[num].to_bits() {
                    // Bone uploads must not break batches when the CPU is
                    // doing the skinning.
                    if !self.config.software_skinning {
                        self.flush();
                        self.shaders.dirty_uniform(DirtyUniforms::bone(num / 12));
                    }
                    self.state.bone_matrix[num] = f32::from_bits(new_val);
                }
                self.state.cmdmem[GE_CMD_BONEMATRIXNUMBER as usize] =
                    ((GE_CMD_BONEMATRIXNUMBER as u32) << 24) | ((num as u32 + 1) & 0x7F);
            }

            GE_CMD_ANTIALIASENABLE => {
                if data != 0 && !self.reported.antialias {
                    self.reported.antialias = true;
                    tracing::warn!("Unsupported antialias enabled: {:06x}", data);
                }
            }

            GE_CMD_TEXLODSLOPE => {
                if data != 0 && !self.reported.tex_lod_slope {
                    self.reported.tex_lod_slope = true;
                    tracing::warn!("Unsupported texture lod slope: {:06x}", data);
                }
            }

            GE_CMD_TEXLEVEL => {
                if data != 0 && !self.reported.tex_level {
                    self.reported.tex_level = true;
                    tracing::warn!("Unsupported texture level bias: {:06x}", data);
                }
                if diff != 0 {
                    self.ctx.texture_changed = true;
                }
            }

            GE_CMD_UNKNOWN_FF => {
                // Hit by quite a few games; supposedly a true no-op.
            }

            GE_CMD_UNKNOWN_03 | GE_CMD_UNKNOWN_0D | GE_CMD_UNKNOWN_11 | GE_CMD_UNKNOWN_29
            | GE_CMD_UNKNOWN_34 | GE_CMD_UNKNOWN_35 | GE_CMD_UNKNOWN_39 | GE_CMD_UNKNOWN_4E
            | GE_CMD_UNKNOWN_4F | GE_CMD_UNKNOWN_52 | GE_CMD_UNKNOWN_59 | GE_CMD_UNKNOWN_5A
            | GE_CMD_UNKNOWN_B6 | GE_CMD_UNKNOWN_B7 | GE_CMD_UNKNOWN_D1 | GE_CMD_UNKNOWN_ED
            | GE_CMD_UNKNOWN_EF | 0xF0..=0xFE => {
                if data != 0 && !self.reported.unknown_cmd {
                    self.reported.unknown_cmd = true;
                    tracing::warn!("Unknown GE command: {:#010x}", word);
                }
            }

            // Everything else is mirror-only state; the flag table already
            // arranged any flush it needed.
            _ => {}
        }
    }

    fn cmd_prim(&mut self, data: u32) {
        let count = data & 0xFFFF;
        if count == 0 {
            return;
        }
        let Some(prim) = PrimitiveType::from_bits(data >> 16) else {
            if !self.reported.unexpected_prim {
                self.reported.unexpected_prim = true;
                tracing::error!("Unexpected prim type: {}", data >> 16);
            }
            return;
        };

        let vtype = self.state.vertex_type();

        // AA lines cannot be drawn sensibly on the backend; drop them.
        if self.state.is_antialias_enabled() {
            if prim == PrimitiveType::LineStrip {
                return;
            }
            if prim == PrimitiveType::Lines && vertex::is_skinning_enabled(vtype) {
                return;
            }
        }

        self.framebuffers
            .set_render_framebuffer(&self.state, &mut self.ctx);

        if self
            .ctx
            .skip_draw_reason
            .intersects(SkipDrawReason::SKIPFRAME | SkipDrawReason::NON_DISPLAYED_FB)
        {
            // Skipped frames still pay their cycles, or games speed up.
            self.transform.setup_vertex_decoder(vtype);
            let cost = self.transform.estimate_per_vertex_cost(&self.state) as u64;
            self.cycles_executed += cost * count as u64;
            return;
        }

        if !self.memory.is_valid_address(self.ctx.vertex_addr) {
            if !self.reported.bad_vertex_addr {
                self.reported.bad_vertex_addr = true;
                tracing::error!("Bad vertex address {:#010x}", self.ctx.vertex_addr);
            }
            return;
        }

        let index_addr = if vertex::is_indexed(vtype) {
            if !self.memory.is_valid_address(self.ctx.index_addr) {
                if !self.reported.bad_index_addr {
                    self.reported.bad_index_addr = true;
                    tracing::error!("Bad index address {:#010x}", self.ctx.index_addr);
                }
                return;
            }
            Some(self.ctx.index_addr)
        } else {
            None
        };

        let bytes_read =
            self.transform
                .submit_prim(self.ctx.vertex_addr, index_addr, prim, count, vtype);

        let cost = self.transform.estimate_per_vertex_cost(&self.state) as u64;
        self.stats.vertex_gpu_cycles += cost * count as u64;
        self.cycles_executed += cost * count as u64;

        // Games chain draws without reloading VADDR/IADDR; the hardware
        // advances the addresses for them.
        match vertex::index_size(vtype) {
            Some(size) => {
                self.ctx.index_addr = self.ctx.index_addr.wrapping_add(count * size);
            }
            None => {
                self.ctx.vertex_addr = self.ctx.vertex_addr.wrapping_add(bytes_read);
            }
        }
    }

    /// Shared front matter of BEZIER and SPLINE: bind the render target,
    /// honor skip-draw, and validate addresses. Returns the control point
    /// and index addresses when the patch should actually be submitted.
    fn patch_setup(&mut self) -> Option<(u32, Option<u32>)> {
        self.framebuffers
            .set_render_framebuffer(&self.state, &mut self.ctx);
        if self
            .ctx
            .skip_draw_reason
            .intersects(SkipDrawReason::SKIPFRAME | SkipDrawReason::NON_DISPLAYED_FB)
        {
            return None;
        }

        if !self.memory.is_valid_address(self.ctx.vertex_addr) {
            if !self.reported.bad_vertex_addr {
                self.reported.bad_vertex_addr = true;
                tracing::error!("Bad vertex address {:#010x}", self.ctx.vertex_addr);
            }
            return None;
        }

        let vtype = self.state.vertex_type();
        let index_addr = if vertex::is_indexed(vtype) {
            if !self.memory.is_valid_address(self.ctx.index_addr) {
                if !self.reported.bad_index_addr {
                    self.reported.bad_index_addr = true;
                    tracing::error!("Bad index address {:#010x}", self.ctx.index_addr);
                }
                return None;
            }
            Some(self.ctx.index_addr)
        } else {
            None
        };

        if self.state.patch_primitive() != PatchPrimType::Triangles as u32 {
            if !self.reported.unsupported_patch {
                self.reported.unsupported_patch = true;
                tracing::error!("Unsupported patch primitive {:x}", self.state.patch_primitive());
            }
            return None;
        }

        Some((self.ctx.vertex_addr, index_addr))
    }

    fn cmd_bezier(&mut self, data: u32) {
        let Some((control_points, indices)) = self.patch_setup() else {
            return;
        };
        let vtype = self.state.vertex_type();
        let patch_prim = PatchPrimType::from_bits(self.state.patch_primitive());
        let ucount = data & 0xFF;
        let vcount = (data >> 8) & 0xFF;
        self.transform
            .submit_bezier(control_points, indices, ucount, vcount, patch_prim, vtype);
    }

    fn cmd_spline(&mut self, data: u32) {
        let Some((control_points, indices)) = self.patch_setup() else {
            return;
        };
        let vtype = self.state.vertex_type();
        let patch_prim = PatchPrimType::from_bits(self.state.patch_primitive());
        let ucount = data & 0xFF;
        let vcount = (data >> 8) & 0xFF;
        let utype = (data >> 16) & 0x3;
        let vtype_knot = (data >> 18) & 0x3;
        self.transform.submit_spline(
            control_points,
            indices,
            ucount,
            vcount,
            utype,
            vtype_knot,
            patch_prim,
            vtype,
        );
    }

    fn cmd_bounding_box(&mut self, list: &mut DisplayList, data: u32) {
        if data == 0 {
            // Nothing to bound; reset to passed.
            list.bbox_result = true;
            return;
        }
        if data & 7 == 0 && data <= 64 {
            let vtype = self.state.vertex_type();
            if vertex::is_indexed(vtype) {
                if !self.reported.indexed_bbox {
                    self.reported.indexed_bbox = true;
                    tracing::error!("Indexed bounding box data not supported");
                }
                // Fail open so BJUMP doesn't skip real geometry.
                list.bbox_result = true;
                return;
            }
            if !self.memory.is_valid_address(self.ctx.vertex_addr) {
                list.bbox_result = true;
                return;
            }
            list.bbox_result =
                self.transform
                    .test_bounding_box(self.ctx.vertex_addr, data, vtype, &self.state);
        } else {
            if !self.reported.bad_bbox {
                self.reported.bad_bbox = true;
                tracing::error!("Bad bounding box data: {:06x}", data);
            }
            list.bbox_result = true;
        }
    }

    fn cmd_vertex_type(&mut self, diff: u32) {
        if diff == 0 {
            return;
        }
        if !self.config.software_skinning {
            if diff & (vertex::VTYPE_TC_MASK | vertex::VTYPE_THROUGH_MASK) != 0 {
                self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
            }
        } else if diff & !vertex::VTYPE_WEIGHTCOUNT_MASK != 0 {
            // Something besides the weight count changed: the batched
            // geometry still needs the old format, so put it back, flush,
            // and reapply.
            self.state.cmdmem[GE_CMD_VERTEXTYPE as usize] ^= diff;
            self.flush();
            self.state.cmdmem[GE_CMD_VERTEXTYPE as usize] ^= diff;
            if diff & (vertex::VTYPE_TC_MASK | vertex::VTYPE_THROUGH_MASK) != 0 {
                self.shaders.dirty_uniform(DirtyUniforms::UVSCALEOFFSET);
            }
        }
    }

    fn matrix_data_4x3(
        &mut self,
        num_cmd: u8,
        select: fn(&mut GpuState) -> &mut [f32; 12],
        dirty: DirtyUniforms,
        data: u32,
    ) {
        let num = (self.state.cmdmem[num_cmd as usize] & 0xF) as usize;
        let new_val = data << 8;
        if num < 12 && new_val != select(&mut self.state)[num].to_bits() {
            self.flush();
            select(&mut self.state)[num] = f32::from_bits(new_val);
            self.shaders.dirty_uniform(dirty);
        }
        self.state.cmdmem[num_cmd as usize] = ((num_cmd as u32) << 24) | ((num as u32 + 1) & 0xF);
    }

    /// Copy a rectangle between guest memory regions, then tell the caches
    /// that care. Both the first and last byte of each side must be valid
    /// or the transfer is skipped whole.
    fn do_block_transfer(&mut self) {
        let src_base = self.state.transfer_src_address();
        let src_stride = self.state.transfer_src_stride();
        let dst_base = self.state.transfer_dst_address();
        let dst_stride = self.state.transfer_dst_stride();
        let src_x = self.state.transfer_src_x();
        let src_y = self.state.transfer_src_y();
        let dst_x = self.state.transfer_dst_x();
        let dst_y = self.state.transfer_dst_y();
        let width = self.state.transfer_width();
        let height = self.state.transfer_height();
        let bpp = self.state.transfer_bpp();

        tracing::debug!(
            "Block transfer: {:#010x}/{} -> {:#010x}/{}, {}x{}x{} ({},{})->({},{})",
            src_base,
            src_stride,
            dst_base,
            dst_stride,
            width,
            height,
            bpp,
            src_x,
            src_y,
            dst_x,
            dst_y
        );

        let src_last = src_base
            .wrapping_add(((height - 1 + src_y) * src_stride + (src_x + width - 1)) * bpp);
        let dst_last = dst_base
            .wrapping_add(((height - 1 + dst_y) * dst_stride + (dst_x + width - 1)) * bpp);

        let valid = self.memory.is_valid_address(src_base)
            && self.memory.is_valid_address(dst_base)
            && self.memory.is_valid_address(src_last)
            && self.memory.is_valid_address(dst_last);
        if !valid {
            if !self.reported.bad_transfer {
                self.reported.bad_transfer = true;
                tracing::error!(
                    "Block transfer with invalid endpoint: {:#010x}..{:#010x} -> {:#010x}..{:#010x}",
                    src_base,
                    src_last,
                    dst_base,
                    dst_last
                );
            }
            return;
        }

        for y in 0..height {
            let src_line = src_base + ((y + src_y) * src_stride + src_x) * bpp;
            let dst_line = dst_base + ((y + dst_y) * dst_stride + dst_x) * bpp;
            let row = match self.memory.read_bytes(src_line, width * bpp) {
                Ok(row) => row,
                Err(err) => {
                    tracing::error!("Block transfer read failed: {}", err);
                    return;
                }
            };
            if let Err(err) = self.memory.write_bytes(dst_line, &row) {
                tracing::error!("Block transfer write failed: {}", err);
                return;
            }
        }

        self.framebuffers.notify_block_transfer(dst_base, src_base);
        self.textures.invalidate(
            dst_base + (dst_y * dst_stride + dst_x) * bpp,
            height * dst_stride * bpp,
            InvalidationKind::Hint,
        );

        // Videos blast frames RAM->VRAM with matching strides and no
        // offsets; let the framebuffer pick the new contents up.
        if self.memory.is_ram_address(src_base)
            && self.memory.is_vram_address(dst_base)
            && dst_stride == src_stride
            && dst_x == 0
            && dst_y == 0
            && src_x == 0
            && src_y == 0
        {
            self.framebuffers
                .update_from_memory(dst_base, ((dst_y + height) * dst_stride * bpp) as i32, true);
        }

        // Some games copy video frames straight over the display buffer
        // instead of drawing anything.
        let back = self.framebuffers.prev_display_framebuf_addr();
        let display = self.framebuffers.display_framebuf_addr();
        if ((back != 0 && dst_base == back) || (display != 0 && dst_base == display))
            && dst_stride == 512
            && height == 272
        {
            self.framebuffers
                .draw_pixels(dst_base, BufferFormat::Rgba8888, 512);
        }
    }

    /// Drain and run lifecycle events. Called between opcodes and before
    /// queries that need a settled view of the frame.
    pub fn process_pending_events(&mut self) {
        while let Some(event) = self.events.try_recv() {
            match event {
                GpuEvent::InitClear => self.init_clear_internal(),
                GpuEvent::BeginFrame => self.begin_frame_internal(),
                GpuEvent::CopyDisplayToOutput => self.copy_display_to_output_internal(),
                GpuEvent::InvalidateCache { addr, size, kind } => {
                    self.invalidate_cache_internal(addr, size, kind)
                }
            }
        }
    }

    fn init_clear_internal(&mut self) {
        if self.config.rendering_mode == RenderingMode::NonBuffered {
            tracing::debug!("InitClear: clearing backbuffer to opaque black");
        }
    }

    fn begin_frame_internal(&mut self) {
        let desired = if self.config.vsync && !self.events.unthrottled() {
            1
        } else {
            0
        };
        if desired != self.vsync_interval {
            tracing::debug!("VSync interval {} -> {}", self.vsync_interval, desired);
            self.vsync_interval = desired;
        }

        self.textures.start_frame();
        self.transform.decimate_tracked_vertex_arrays();
        self.shaders.dirty_shader();
        self.shaders.dirty_uniform(DirtyUniforms::ALL);
        self.framebuffers.begin_frame();
    }

    fn copy_display_to_output_internal(&mut self) {
        self.flush();
        self.framebuffers.copy_display_to_output();
        self.framebuffers.end_frame();
        self.shaders.dirty_last_shader();
        self.ctx.texture_changed = true;
    }

    fn invalidate_cache_internal(&mut self, addr: u32, size: i32, kind: InvalidationKind) {
        if size > 0 {
            self.textures.invalidate(addr, size as u32, kind);
        } else {
            self.textures.invalidate_all(kind);
        }
        if kind != InvalidationKind::All {
            self.framebuffers
                .update_from_memory(addr, size, kind == InvalidationKind::Safe);
        }
    }

    /// Drop caches after a device reset, keeping compiled objects where
    /// the platform allows.
    pub fn device_lost(&mut self) {
        tracing::info!("GeGpu: device lost");
        self.shaders.clear_cache(false);
        self.textures.clear(false);
        self.framebuffers.device_lost();
    }

    /// CPU copied `size` bytes from `src` to `dest`; invalidate affected
    /// caches and track stray framebuffer downloads.
    pub fn update_memory(&mut self, dest: u32, src: u32, size: i32) {
        self.invalidate_cache_internal(dest, size, InvalidationKind::Hint);
        if self.memory.is_vram_address(src) && self.memory.is_ram_address(dest) {
            self.framebuffers.notify_framebuffer_copy(src, dest, size);
        }
    }

    /// Whether the displayed framebuffer was drawn to since last asked.
    /// Drains pending events first so the answer is stable.
    pub fn framebuffer_dirty(&mut self) -> bool {
        self.process_pending_events();
        if let Some(vfb) = self.framebuffers.get_display_vfb() {
            let dirty = vfb.dirty_after_display;
            vfb.dirty_after_display = false;
            return dirty;
        }
        true
    }

    pub fn framebuffer_really_dirty(&mut self) -> bool {
        self.process_pending_events();
        if let Some(vfb) = self.framebuffers.get_display_vfb() {
            let dirty = vfb.really_dirty_after_display;
            vfb.really_dirty_after_display = false;
            return dirty;
        }
        true
    }

    pub fn set_display_framebuffer(&mut self, addr: u32, stride: u32, format: BufferFormat) {
        self.framebuffers.set_display_framebuffer(addr, stride, format);
    }

    pub fn clear_cache_next_frame(&mut self) {
        self.textures.clear_next_frame();
    }

    pub fn clear_shader_cache(&mut self) {
        self.shaders.clear_cache(true);
    }

    pub fn resized(&mut self) {
        self.framebuffers.resized();
    }

    pub fn get_framebuffer_list(&self) -> Vec<FramebufferInfo> {
        self.framebuffers.get_framebuffer_list()
    }

    /// Debugger view of the current color target.
    pub fn get_current_framebuffer(&self) -> Option<FramebufferInfo> {
        self.framebuffers.get_current_framebuffer().map(|vfb| FramebufferInfo {
            fb_addr: vfb.fb_addr,
            width: vfb.width,
            height: vfb.height,
            format: vfb.format,
        })
    }

    /// Depth and stencil contents are backend-side only; nothing to read
    /// back without a rasterizer.
    pub fn get_current_depthbuffer(&self) -> Option<FramebufferInfo> {
        None
    }

    pub fn get_current_stencilbuffer(&self) -> Option<FramebufferInfo> {
        None
    }

    /// Poll subsystem counters into the stats block.
    pub fn update_stats(&mut self) {
        self.stats.num_flushes = self.transform.num_flushes();
        self.stats.num_draw_calls = self.transform.num_draw_calls();
        self.stats.num_vertex_shaders = self.shaders.num_vertex_shaders();
        self.stats.num_fragment_shaders = self.shaders.num_fragment_shaders();
        self.stats.num_shaders = self.shaders.num_programs();
        self.stats.num_textures = self.textures.num_loaded_textures();
        self.stats.num_vfbs = self.framebuffers.num_vfbs();
    }

    /// Snapshot the core's own mirrored state for a save state.
    pub fn save_state(&self) -> GeSnapshot {
        GeSnapshot {
            cmdmem: self.state.cmdmem.to_vec(),
            world_matrix: self.state.world_matrix.to_vec(),
            view_matrix: self.state.view_matrix.to_vec(),
            proj_matrix: self.state.proj_matrix.to_vec(),
            tgen_matrix: self.state.tgen_matrix.to_vec(),
            bone_matrix: self.state.bone_matrix.to_vec(),
            lights: self.ctx.lights,
            uv: self.ctx.uv,
            morph_weights: self.ctx.morph_weights,
            vertex_addr: self.ctx.vertex_addr,
            index_addr: self.ctx.index_addr,
            offset_addr: self.ctx.offset_addr,
            cur_texture_width: self.ctx.cur_texture_width,
            cur_texture_height: self.ctx.cur_texture_height,
        }
    }

    /// Restore a snapshot. Unless `frozen` (frame-stepping mode), cached
    /// GPU data derived from guest memory is thrown away wholesale.
    pub fn restore_state(&mut self, snapshot: &GeSnapshot, frozen: bool) {
        fn copy_into(dst: &mut [f32], src: &[f32]) {
            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
        }

        let n = self.state.cmdmem.len().min(snapshot.cmdmem.len());
        self.state.cmdmem[..n].copy_from_slice(&snapshot.cmdmem[..n]);
        copy_into(&mut self.state.world_matrix, &snapshot.world_matrix);
        copy_into(&mut self.state.view_matrix, &snapshot.view_matrix);
        copy_into(&mut self.state.proj_matrix, &snapshot.proj_matrix);
        copy_into(&mut self.state.tgen_matrix, &snapshot.tgen_matrix);
        copy_into(&mut self.state.bone_matrix, &snapshot.bone_matrix);
        self.ctx.lights = snapshot.lights;
        self.ctx.uv = snapshot.uv;
        self.ctx.morph_weights = snapshot.morph_weights;
        self.ctx.vertex_addr = snapshot.vertex_addr;
        self.ctx.index_addr = snapshot.index_addr;
        self.ctx.offset_addr = snapshot.offset_addr;
        self.ctx.cur_texture_width = snapshot.cur_texture_width;
        self.ctx.cur_texture_height = snapshot.cur_texture_height;

        if !frozen {
            self.textures.clear(true);
            self.transform.clear_tracked_vertex_arrays();
            self.ctx.texture_changed = true;
            self.framebuffers.destroy_all_fbos();
        }
    }
}
