//! Virtual framebuffer tracking
//!
//! Games allocate rendertargets anywhere in VRAM; this manager keeps an
//! emulator-side record per guest framebuffer, decides which one draws
//! target, and reacts to block transfers and memory copies that alias
//! them.

use std::sync::Arc;

use psp_core::config::RenderingMode;
use psp_memory::MemoryManager;

use crate::state::{BufferFormat, GpuState, GpuStateCtx, SkipDrawReason};

/// Framebuffers unused for this many frames get dropped at frame start.
const VFB_KILL_AGE: u32 = 30;

/// Emulator-side record of a guest-allocated rendertarget.
#[derive(Debug, Clone)]
pub struct VirtualFramebuffer {
    pub fb_addr: u32,
    pub fb_stride: u32,
    pub format: BufferFormat,
    pub width: u32,
    pub height: u32,
    /// Drawn to since it was last displayed.
    pub dirty_after_display: bool,
    /// Drawn to by something other than a full-screen blit since displayed.
    pub really_dirty_after_display: bool,
    pub last_frame_used: u32,
    /// Needs re-upload from guest memory before next use.
    pub reload_from_memory: bool,
}

/// Summary row for debuggers and the UI.
#[derive(Debug, Clone)]
pub struct FramebufferInfo {
    pub fb_addr: u32,
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
}

/// Owns the virtual framebuffer table and the display binding.
pub struct FramebufferManager {
    memory: Arc<MemoryManager>,
    rendering_mode: RenderingMode,
    vfbs: Vec<VirtualFramebuffer>,
    current_render: Option<usize>,
    display_framebuf_addr: u32,
    prev_display_framebuf_addr: u32,
    display_stride: u32,
    display_format: BufferFormat,
    frame_counter: u32,
    // Observability counters; the stats poller reads these.
    num_draw_pixels: u32,
    last_draw_pixels: Option<(u32, BufferFormat, u32)>,
    num_display_copies: u32,
}

impl FramebufferManager {
    pub fn new(memory: Arc<MemoryManager>, rendering_mode: RenderingMode) -> Self {
        Self {
            memory,
            rendering_mode,
            vfbs: Vec::new(),
            current_render: None,
            display_framebuf_addr: 0,
            prev_display_framebuf_addr: 0,
            display_stride: 0,
            display_format: BufferFormat::Rgba8888,
            frame_counter: 0,
            num_draw_pixels: 0,
            last_draw_pixels: None,
            num_display_copies: 0,
        }
    }

    /// Bind the rendertarget the mirrored state points at, creating a
    /// virtual framebuffer on first sight. Also refreshes the skip-draw
    /// reason for non-displayed targets.
    pub fn set_render_framebuffer(&mut self, state: &GpuState, ctx: &mut GpuStateCtx) {
        let fb_addr = state.framebuf_address();
        let fb_stride = state.framebuf_stride();
        let format = state.framebuf_format();

        if !ctx.framebuf_changed {
            if let Some(idx) = self.current_render {
                if self.vfbs[idx].fb_addr == fb_addr {
                    self.touch(idx);
                    return;
                }
            }
        }
        ctx.framebuf_changed = false;

        // Estimated size: the region registers carry the game's drawing
        // area; fall back to the native display size.
        let width = (state.region_x2() + 1).clamp(1, 512);
        let height = (state.region_y2() + 1).clamp(1, 272);

        let idx = match self.vfbs.iter().position(|vfb| vfb.fb_addr == fb_addr) {
            Some(idx) => {
                let vfb = &mut self.vfbs[idx];
                vfb.fb_stride = fb_stride;
                vfb.format = format;
                vfb.width = vfb.width.max(width);
                vfb.height = vfb.height.max(height);
                idx
            }
            None => {
                tracing::debug!(
                    "Creating VFB {:#010x} stride {} {}x{} {:?}",
                    fb_addr,
                    fb_stride,
                    width,
                    height,
                    format
                );
                self.vfbs.push(VirtualFramebuffer {
                    fb_addr,
                    fb_stride,
                    format,
                    width,
                    height,
                    dirty_after_display: false,
                    really_dirty_after_display: false,
                    last_frame_used: self.frame_counter,
                    reload_from_memory: false,
                });
                self.vfbs.len() - 1
            }
        };
        self.current_render = Some(idx);
        self.touch(idx);

        ctx.skip_draw_reason
            .remove(SkipDrawReason::NON_DISPLAYED_FB);
        if self.rendering_mode == RenderingMode::NonBuffered
            && self.display_framebuf_addr != 0
            && fb_addr != self.display_framebuf_addr
        {
            // Without buffering there is nowhere to put a non-displayed
            // target; account the draws and skip them.
            ctx.skip_draw_reason
                .insert(SkipDrawReason::NON_DISPLAYED_FB);
        }
    }

    fn touch(&mut self, idx: usize) {
        let vfb = &mut self.vfbs[idx];
        vfb.last_frame_used = self.frame_counter;
        vfb.dirty_after_display = true;
        vfb.really_dirty_after_display = true;
    }

    /// The display hardware was pointed at a new framebuffer.
    pub fn set_display_framebuffer(&mut self, addr: u32, stride: u32, format: BufferFormat) {
        if addr != self.display_framebuf_addr {
            self.prev_display_framebuf_addr = self.display_framebuf_addr;
        }
        self.display_framebuf_addr = addr;
        self.display_stride = stride;
        self.display_format = format;
    }

    pub fn display_framebuf_addr(&self) -> u32 {
        self.display_framebuf_addr
    }

    pub fn prev_display_framebuf_addr(&self) -> u32 {
        self.prev_display_framebuf_addr
    }

    /// The virtual framebuffer currently scanned out, if tracked.
    pub fn get_display_vfb(&mut self) -> Option<&mut VirtualFramebuffer> {
        let addr = self.display_framebuf_addr;
        self.vfbs.iter_mut().find(|vfb| vfb.fb_addr == addr)
    }

    pub fn begin_frame(&mut self) {
        self.frame_counter += 1;
        let cutoff = self.frame_counter.saturating_sub(VFB_KILL_AGE);
        let before = self.vfbs.len();
        let current_addr = self.current_render.map(|idx| self.vfbs[idx].fb_addr);
        self.vfbs.retain(|vfb| vfb.last_frame_used >= cutoff);
        if before != self.vfbs.len() {
            self.current_render = current_addr
                .and_then(|addr| self.vfbs.iter().position(|vfb| vfb.fb_addr == addr));
        }
    }

    pub fn end_frame(&mut self) {}

    /// Present the displayed VFB on the output surface.
    pub fn copy_display_to_output(&mut self) {
        self.num_display_copies += 1;
        if let Some(vfb) = self.get_display_vfb() {
            vfb.dirty_after_display = false;
            vfb.really_dirty_after_display = false;
        }
        // Binding the backbuffer invalidates the current render target.
        self.current_render = None;
    }

    /// A block transfer wrote into guest memory; framebuffers aliasing the
    /// destination must reload, and a framebuffer source may be promoted to
    /// a GPU-side blit by a real backend.
    pub fn notify_block_transfer(&mut self, dst: u32, src: u32) {
        for vfb in &mut self.vfbs {
            let size = vfb.fb_stride.max(vfb.width) * vfb.height * 4;
            if dst >= vfb.fb_addr && dst < vfb.fb_addr.saturating_add(size) {
                vfb.reload_from_memory = true;
                vfb.dirty_after_display = true;
            }
        }
        tracing::trace!("Block transfer notify: {:#010x} -> {:#010x}", src, dst);
    }

    /// A framebuffer was copied into RAM by the CPU (or a stray DMA).
    pub fn notify_framebuffer_copy(&mut self, src: u32, dst: u32, size: i32) {
        tracing::debug!(
            "Framebuffer copy tracked: {:#010x} -> {:#010x} ({} bytes)",
            src,
            dst,
            size
        );
    }

    /// Guest memory backing a framebuffer changed; schedule a re-upload.
    pub fn update_from_memory(&mut self, addr: u32, size: i32, safe: bool) {
        for vfb in &mut self.vfbs {
            let vfb_size = vfb.fb_stride.max(vfb.width) * vfb.height * 4;
            let end = vfb.fb_addr.saturating_add(vfb_size);
            if addr < end && vfb.fb_addr < addr.saturating_add(size.max(0) as u32) {
                vfb.reload_from_memory = true;
                if safe {
                    vfb.dirty_after_display = true;
                }
            }
        }
    }

    /// Blast raw guest pixels straight to the output surface.
    pub fn draw_pixels(&mut self, addr: u32, format: BufferFormat, stride: u32) {
        if !self.memory.is_valid_address(addr) {
            return;
        }
        self.num_draw_pixels += 1;
        self.last_draw_pixels = Some((addr, format, stride));
        tracing::debug!(
            "DrawPixels from {:#010x}, stride {}, {:?}",
            addr,
            stride,
            format
        );
    }

    pub fn destroy_all_fbos(&mut self) {
        self.vfbs.clear();
        self.current_render = None;
    }

    pub fn device_lost(&mut self) {
        self.destroy_all_fbos();
    }

    pub fn resized(&mut self) {
        // Scale factors changed; every FBO is the wrong size now.
        self.destroy_all_fbos();
    }

    /// The rendertarget draws currently land in, for debuggers.
    pub fn get_current_framebuffer(&self) -> Option<&VirtualFramebuffer> {
        self.current_render.map(|idx| &self.vfbs[idx])
    }

    pub fn get_framebuffer_list(&self) -> Vec<FramebufferInfo> {
        self.vfbs
            .iter()
            .map(|vfb| FramebufferInfo {
                fb_addr: vfb.fb_addr,
                width: vfb.width,
                height: vfb.height,
                format: vfb.format,
            })
            .collect()
    }

    pub fn num_vfbs(&self) -> usize {
        self.vfbs.len()
    }

    pub fn num_draw_pixels(&self) -> u32 {
        self.num_draw_pixels
    }

    pub fn last_draw_pixels(&self) -> Option<(u32, BufferFormat, u32)> {
        self.last_draw_pixels
    }

    pub fn num_display_copies(&self) -> u32 {
        self.num_display_copies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::*;
    use psp_memory::VRAM_BASE;

    fn state_with_fb(ptr_low: u32, stride: u32) -> GpuState {
        let mut state = GpuState::new();
        state.cmdmem[GE_CMD_FRAMEBUFPTR as usize] = ((GE_CMD_FRAMEBUFPTR as u32) << 24) | ptr_low;
        state.cmdmem[GE_CMD_FRAMEBUFWIDTH as usize] =
            ((GE_CMD_FRAMEBUFWIDTH as u32) << 24) | stride;
        state.cmdmem[GE_CMD_REGION2 as usize] =
            ((GE_CMD_REGION2 as u32) << 24) | ((271 << 10) | 479);
        state
    }

    #[test]
    fn test_render_framebuffer_created_once() {
        let memory = MemoryManager::new();
        let mut fbs = FramebufferManager::new(memory, RenderingMode::Buffered);
        let state = state_with_fb(0x0000, 512);
        let mut ctx = GpuStateCtx::new();

        fbs.set_render_framebuffer(&state, &mut ctx);
        assert_eq!(fbs.num_vfbs(), 1);
        assert!(!ctx.framebuf_changed);

        fbs.set_render_framebuffer(&state, &mut ctx);
        assert_eq!(fbs.num_vfbs(), 1);

        let info = &fbs.get_framebuffer_list()[0];
        assert_eq!(info.fb_addr, VRAM_BASE);
        assert_eq!(info.width, 480);
        assert_eq!(info.height, 272);
    }

    #[test]
    fn test_non_buffered_skips_non_displayed_target() {
        let memory = MemoryManager::new();
        let mut fbs = FramebufferManager::new(memory, RenderingMode::NonBuffered);
        fbs.set_display_framebuffer(VRAM_BASE, 512, BufferFormat::Rgba8888);

        let state = state_with_fb(0x8_8000, 512);
        let mut ctx = GpuStateCtx::new();
        fbs.set_render_framebuffer(&state, &mut ctx);
        assert!(ctx.skip_draw_reason.contains(SkipDrawReason::NON_DISPLAYED_FB));

        let state = state_with_fb(0x0000, 512);
        ctx.framebuf_changed = true;
        fbs.set_render_framebuffer(&state, &mut ctx);
        assert!(!ctx.skip_draw_reason.contains(SkipDrawReason::NON_DISPLAYED_FB));
    }

    #[test]
    fn test_display_addr_tracking() {
        let memory = MemoryManager::new();
        let mut fbs = FramebufferManager::new(memory, RenderingMode::Buffered);
        fbs.set_display_framebuffer(VRAM_BASE, 512, BufferFormat::Rgba8888);
        fbs.set_display_framebuffer(VRAM_BASE + 0x8_8000, 512, BufferFormat::Rgba8888);
        assert_eq!(fbs.display_framebuf_addr(), VRAM_BASE + 0x8_8000);
        assert_eq!(fbs.prev_display_framebuf_addr(), VRAM_BASE);
    }

    #[test]
    fn test_block_transfer_marks_reload() {
        let memory = MemoryManager::new();
        let mut fbs = FramebufferManager::new(memory, RenderingMode::Buffered);
        let state = state_with_fb(0x0000, 512);
        let mut ctx = GpuStateCtx::new();
        fbs.set_render_framebuffer(&state, &mut ctx);

        fbs.notify_block_transfer(VRAM_BASE + 0x100, 0x0880_0000);
        fbs.set_display_framebuffer(VRAM_BASE, 512, BufferFormat::Rgba8888);
        assert!(fbs.get_display_vfb().unwrap().reload_from_memory);
    }

    #[test]
    fn test_dirty_after_display_clears_on_present() {
        let memory = MemoryManager::new();
        let mut fbs = FramebufferManager::new(memory, RenderingMode::Buffered);
        let state = state_with_fb(0x0000, 512);
        let mut ctx = GpuStateCtx::new();
        fbs.set_render_framebuffer(&state, &mut ctx);
        fbs.set_display_framebuffer(VRAM_BASE, 512, BufferFormat::Rgba8888);

        assert!(fbs.get_display_vfb().unwrap().dirty_after_display);
        fbs.copy_display_to_output();
        assert!(!fbs.get_display_vfb().unwrap().dirty_after_display);
    }
}
