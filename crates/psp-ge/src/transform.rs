//! Deferred draw engine
//!
//! Primitive submissions are buffered here; nothing reaches the backend
//! until a flush. The interpreter's flag table decides when that happens,
//! which is what lets games re-send identical state every draw without
//! costing anything.

use std::collections::HashMap;
use std::sync::Arc;

use psp_memory::MemoryManager;

use crate::shader::ShaderManager;
use crate::state::{GpuState, GpuStateCtx};
use crate::texture::TextureCache;
use crate::vertex;

/// Vertex arrays not drawn for this many frames stop being tracked.
const VERTEX_ARRAY_KILL_AGE: u32 = 120;

/// GE primitive types as encoded in the PRIM command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Points = 0,
    Lines = 1,
    LineStrip = 2,
    Triangles = 3,
    TriangleStrip = 4,
    TriangleFan = 5,
    Rectangles = 6,
}

impl PrimitiveType {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(PrimitiveType::Points),
            1 => Some(PrimitiveType::Lines),
            2 => Some(PrimitiveType::LineStrip),
            3 => Some(PrimitiveType::Triangles),
            4 => Some(PrimitiveType::TriangleStrip),
            5 => Some(PrimitiveType::TriangleFan),
            6 => Some(PrimitiveType::Rectangles),
            _ => None,
        }
    }
}

/// Patch primitive selected by PATCHPRIMITIVE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPrimType {
    Triangles = 0,
    Lines = 1,
    Points = 2,
}

impl PatchPrimType {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            1 => PatchPrimType::Lines,
            2 => PatchPrimType::Points,
            _ => PatchPrimType::Triangles,
        }
    }
}

/// One buffered draw, waiting for a flush.
#[derive(Debug, Clone)]
pub struct DeferredDraw {
    pub prim: PrimitiveType,
    pub vertex_addr: u32,
    pub index_addr: Option<u32>,
    pub count: u32,
    pub vtype: u32,
}

/// Simplified decoded vertex for debugging interfaces.
#[derive(Debug, Clone, Copy)]
pub struct SimpleVertex {
    pub pos: [f32; 3],
}

#[derive(Debug, Clone, Copy)]
struct TrackedVertexArray {
    last_frame: u32,
    draw_count: u32,
}

/// Buffers primitives and performs the actual flush.
pub struct TransformPipeline {
    memory: Arc<MemoryManager>,
    pending: Vec<DeferredDraw>,
    pending_vertex_count: u32,
    /// Vertex format currently programmed into the decoder.
    decoder_vtype: u32,
    tracked_arrays: HashMap<u32, TrackedVertexArray>,
    frame_counter: u32,
    num_flushes: u32,
    num_draw_calls: u32,
    num_patches: u32,
    last_vertex_addr: u32,
}

impl TransformPipeline {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self {
            memory,
            pending: Vec::new(),
            pending_vertex_count: 0,
            decoder_vtype: 0,
            tracked_arrays: HashMap::new(),
            frame_counter: 0,
            num_flushes: 0,
            num_draw_calls: 0,
            num_patches: 0,
            last_vertex_addr: 0,
        }
    }

    /// Program the vertex decoder for a format without submitting anything.
    /// Skip-draw still needs this so cycle accounting sees the right stride.
    pub fn setup_vertex_decoder(&mut self, vtype: u32) {
        self.decoder_vtype = vtype;
    }

    /// Rough per-vertex cycle estimate used for GE timing.
    pub fn estimate_per_vertex_cost(&self, state: &GpuState) -> u32 {
        let mut cost = 20;
        if state.is_lighting_enabled() {
            cost += 10;
            for light in 0..4 {
                if state.is_light_enabled(light) {
                    cost += 7;
                }
            }
        }
        if vertex::is_skinning_enabled(self.decoder_vtype) {
            cost += 8 * vertex::num_bone_weights(self.decoder_vtype);
        }
        let morphs = vertex::morph_count(self.decoder_vtype);
        if morphs > 1 {
            cost += 5 * morphs;
        }
        cost
    }

    /// Buffer a primitive. Returns the number of vertex bytes the draw
    /// consumes, which PRIM uses to advance the vertex address.
    pub fn submit_prim(
        &mut self,
        vertex_addr: u32,
        index_addr: Option<u32>,
        prim: PrimitiveType,
        count: u32,
        vtype: u32,
    ) -> u32 {
        self.setup_vertex_decoder(vtype);
        self.last_vertex_addr = vertex_addr;
        self.pending.push(DeferredDraw {
            prim,
            vertex_addr,
            index_addr,
            count,
            vtype,
        });
        self.pending_vertex_count += count;

        let frame = self.frame_counter;
        let entry = self
            .tracked_arrays
            .entry(vertex_addr)
            .or_insert(TrackedVertexArray {
                last_frame: frame,
                draw_count: 0,
            });
        entry.last_frame = frame;
        entry.draw_count += 1;

        count * vertex::vertex_size(vtype)
    }

    /// Tessellate and buffer a bezier patch.
    pub fn submit_bezier(
        &mut self,
        vertex_addr: u32,
        index_addr: Option<u32>,
        ucount: u32,
        vcount: u32,
        patch_prim: PatchPrimType,
        vtype: u32,
    ) {
        tracing::trace!(
            "Bezier patch {}x{} at {:#010x} ({:?})",
            ucount,
            vcount,
            vertex_addr,
            patch_prim
        );
        self.num_patches += 1;
        let count = ucount * vcount;
        self.submit_prim(vertex_addr, index_addr, PrimitiveType::Triangles, count, vtype);
    }

    /// Tessellate and buffer a spline surface.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_spline(
        &mut self,
        vertex_addr: u32,
        index_addr: Option<u32>,
        ucount: u32,
        vcount: u32,
        utype: u32,
        vtype_knot: u32,
        patch_prim: PatchPrimType,
        vtype: u32,
    ) {
        tracing::trace!(
            "Spline {}x{} knots {}/{} at {:#010x} ({:?})",
            ucount,
            vcount,
            utype,
            vtype_knot,
            vertex_addr,
            patch_prim
        );
        self.num_patches += 1;
        let count = ucount * vcount;
        self.submit_prim(vertex_addr, index_addr, PrimitiveType::Triangles, count, vtype);
    }

    /// Test whether the given control points fall inside the drawing
    /// region. Only through-mode positions can be tested without running
    /// the full transform; everything else passes conservatively.
    pub fn test_bounding_box(
        &mut self,
        vertex_addr: u32,
        count: u32,
        vtype: u32,
        state: &GpuState,
    ) -> bool {
        if count == 0 {
            return true;
        }
        if !vertex::is_through(vtype) {
            return true;
        }
        let Some(positions) = self.decode_positions(vertex_addr, vtype, count) else {
            return true;
        };

        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for pos in &positions {
            min_x = min_x.min(pos[0]);
            max_x = max_x.max(pos[0]);
            min_y = min_y.min(pos[1]);
            max_y = max_y.max(pos[1]);
        }

        let x1 = state.scissor_x1() as f32;
        let y1 = state.scissor_y1() as f32;
        let x2 = state.scissor_x2() as f32 + 1.0;
        let y2 = state.scissor_y2() as f32 + 1.0;
        max_x >= x1 && min_x < x2 && max_y >= y1 && min_y < y2
    }

    fn decode_positions(&self, vertex_addr: u32, vtype: u32, count: u32) -> Option<Vec<[f32; 3]>> {
        let stride = vertex::vertex_size(vtype);
        if stride == 0 {
            return None;
        }
        let offset = vertex::pos_offset(vtype);
        let data = self.memory.read_bytes(vertex_addr, stride * count).ok()?;

        let mut positions = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let at = i * stride as usize + offset as usize;
            let pos = match vertex::pos_format(vtype) {
                1 => [
                    data[at] as i8 as f32,
                    data[at + 1] as i8 as f32,
                    data[at + 2] as i8 as f32,
                ],
                2 => [
                    i16::from_le_bytes([data[at], data[at + 1]]) as f32,
                    i16::from_le_bytes([data[at + 2], data[at + 3]]) as f32,
                    i16::from_le_bytes([data[at + 4], data[at + 5]]) as f32,
                ],
                3 => [
                    f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]),
                    f32::from_le_bytes([data[at + 4], data[at + 5], data[at + 6], data[at + 7]]),
                    f32::from_le_bytes([data[at + 8], data[at + 9], data[at + 10], data[at + 11]]),
                ],
                _ => return None,
            };
            positions.push(pos);
        }
        Some(positions)
    }

    /// Debugger hook: decode the positions of the most recently submitted
    /// vertex data.
    pub fn get_current_simple_vertices(&self, count: u32, vtype: u32) -> Option<Vec<SimpleVertex>> {
        let positions = self.decode_positions(self.last_vertex_addr, vtype, count)?;
        Some(positions.into_iter().map(|pos| SimpleVertex { pos }).collect())
    }

    /// Drain every buffered draw to the backend, applying the accumulated
    /// dirty state first. A flush with nothing pending is free.
    pub fn flush(
        &mut self,
        state: &GpuState,
        ctx: &mut GpuStateCtx,
        shaders: &mut ShaderManager,
        textures: &mut TextureCache,
    ) {
        if self.pending.is_empty() {
            return;
        }

        if ctx.texture_changed {
            if state.is_texture_map_enabled() {
                textures.set_texture(state, ctx);
            }
            ctx.texture_changed = false;
        }
        let applied = shaders.take_dirty();
        tracing::trace!(
            "Flush: {} draw(s), {} vertices, uniforms {:?}",
            self.pending.len(),
            self.pending_vertex_count,
            applied
        );

        self.num_flushes += 1;
        self.num_draw_calls += self.pending.len() as u32;
        self.pending.clear();
        self.pending_vertex_count = 0;
    }

    /// Forget vertex arrays that have not been drawn recently.
    pub fn decimate_tracked_vertex_arrays(&mut self) {
        self.frame_counter += 1;
        let cutoff = self.frame_counter.saturating_sub(VERTEX_ARRAY_KILL_AGE);
        self.tracked_arrays.retain(|addr, tracked| {
            let keep = tracked.last_frame >= cutoff;
            if !keep {
                tracing::trace!(
                    "Dropping stale vertex array {:#010x} ({} draws)",
                    addr,
                    tracked.draw_count
                );
            }
            keep
        });
    }

    pub fn clear_tracked_vertex_arrays(&mut self) {
        self.tracked_arrays.clear();
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn num_flushes(&self) -> u32 {
        self.num_flushes
    }

    pub fn num_draw_calls(&self) -> u32 {
        self.num_draw_calls
    }

    pub fn num_patches(&self) -> u32 {
        self.num_patches
    }

    pub fn num_tracked_vertex_arrays(&self) -> usize {
        self.tracked_arrays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::*;
    use crate::vertex::{VTYPE_POS_SHIFT, VTYPE_THROUGH_MASK};
    use psp_memory::{MemoryManager, RAM_BASE};

    fn pipeline() -> (Arc<MemoryManager>, TransformPipeline) {
        let memory = MemoryManager::new();
        let pipeline = TransformPipeline::new(Arc::clone(&memory));
        (memory, pipeline)
    }

    fn flush_env() -> (GpuState, GpuStateCtx, ShaderManager, TextureCache) {
        let memory = MemoryManager::new();
        (
            GpuState::new(),
            GpuStateCtx::new(),
            ShaderManager::new(),
            TextureCache::new(memory),
        )
    }

    #[test]
    fn test_submit_buffers_until_flush() {
        let (_memory, mut pipeline) = pipeline();
        let (state, mut ctx, mut shaders, mut textures) = flush_env();

        let vtype = 3 << VTYPE_POS_SHIFT;
        let bytes = pipeline.submit_prim(RAM_BASE, None, PrimitiveType::Triangles, 3, vtype);
        assert_eq!(bytes, 36);
        assert_eq!(pipeline.num_pending(), 1);
        assert_eq!(pipeline.num_flushes(), 0);

        pipeline.flush(&state, &mut ctx, &mut shaders, &mut textures);
        assert_eq!(pipeline.num_pending(), 0);
        assert_eq!(pipeline.num_flushes(), 1);
        assert_eq!(pipeline.num_draw_calls(), 1);
    }

    #[test]
    fn test_empty_flush_is_free() {
        let (_memory, mut pipeline) = pipeline();
        let (state, mut ctx, mut shaders, mut textures) = flush_env();
        pipeline.flush(&state, &mut ctx, &mut shaders, &mut textures);
        pipeline.flush(&state, &mut ctx, &mut shaders, &mut textures);
        assert_eq!(pipeline.num_flushes(), 0);
    }

    #[test]
    fn test_vertex_cost_scales_with_lights() {
        let (_memory, pipeline) = pipeline();
        let mut state = GpuState::new();
        let base = pipeline.estimate_per_vertex_cost(&state);

        state.cmdmem[GE_CMD_LIGHTINGENABLE as usize] =
            ((GE_CMD_LIGHTINGENABLE as u32) << 24) | 1;
        state.cmdmem[GE_CMD_LIGHTENABLE0 as usize] = ((GE_CMD_LIGHTENABLE0 as u32) << 24) | 1;
        assert!(pipeline.estimate_per_vertex_cost(&state) > base);
    }

    #[test]
    fn test_bounding_box_through_mode() {
        let (memory, mut pipeline) = pipeline();
        let state = {
            let mut s = GpuState::new();
            s.cmdmem[GE_CMD_SCISSOR2 as usize] =
                ((GE_CMD_SCISSOR2 as u32) << 24) | ((271 << 10) | 479);
            s
        };

        // Two s16 through-mode vertices inside the scissor.
        let vtype = (2 << VTYPE_POS_SHIFT) | VTYPE_THROUGH_MASK;
        let mut data = Vec::new();
        for (x, y, z) in [(10i16, 10i16, 0i16), (100, 100, 0)] {
            data.extend_from_slice(&x.to_le_bytes());
            data.extend_from_slice(&y.to_le_bytes());
            data.extend_from_slice(&z.to_le_bytes());
        }
        memory.write_bytes(RAM_BASE, &data).unwrap();
        assert!(pipeline.test_bounding_box(RAM_BASE, 2, vtype, &state));

        // Entirely right of the scissor: rejected.
        let mut data = Vec::new();
        for (x, y, z) in [(600i16, 10i16, 0i16), (700, 100, 0)] {
            data.extend_from_slice(&x.to_le_bytes());
            data.extend_from_slice(&y.to_le_bytes());
            data.extend_from_slice(&z.to_le_bytes());
        }
        memory.write_bytes(RAM_BASE, &data).unwrap();
        assert!(!pipeline.test_bounding_box(RAM_BASE, 2, vtype, &state));
    }

    #[test]
    fn test_bounding_box_fails_open_for_transformed() {
        let (_memory, mut pipeline) = pipeline();
        let state = GpuState::new();
        let vtype = 3 << VTYPE_POS_SHIFT;
        assert!(pipeline.test_bounding_box(RAM_BASE, 8, vtype, &state));
    }

    #[test]
    fn test_tracked_arrays_decimate() {
        let (_memory, mut pipeline) = pipeline();
        let vtype = 3 << VTYPE_POS_SHIFT;
        pipeline.submit_prim(RAM_BASE, None, PrimitiveType::Triangles, 3, vtype);
        assert_eq!(pipeline.num_tracked_vertex_arrays(), 1);
        for _ in 0..(VERTEX_ARRAY_KILL_AGE + 2) {
            pipeline.decimate_tracked_vertex_arrays();
        }
        assert_eq!(pipeline.num_tracked_vertex_arrays(), 0);
    }
}
