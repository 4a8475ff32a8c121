//! Texture cache bookkeeping
//!
//! Decoding is out of scope for the GE core; what matters here is the
//! cache's view of guest memory: which ranges back live textures, when the
//! CLUT must be (re)materialized, and when entries become stale.

use std::collections::HashMap;
use std::sync::Arc;

use psp_core::bridge::InvalidationKind;
use psp_memory::MemoryManager;

use crate::state::{GpuState, GpuStateCtx};

/// Largest CLUT the hardware can load: 64 blocks of 32 bytes.
pub const CLUT_MAX_BYTES: u32 = 2048;

/// Entries older than this many frames are decimated at frame start.
const TEXTURE_KILL_AGE: u32 = 200;

#[derive(Debug, Clone)]
struct TexCacheEntry {
    addr: u32,
    size_in_ram: u32,
    last_frame: u32,
    invalidated: bool,
}

/// Cache of decoded guest textures, keyed by their guest address.
pub struct TextureCache {
    memory: Arc<MemoryManager>,
    entries: HashMap<u32, TexCacheEntry>,
    clut: Vec<u8>,
    clut_dirty: bool,
    frame_counter: u32,
    clear_next_frame: bool,
}

impl TextureCache {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self {
            memory,
            entries: HashMap::new(),
            clut: vec![0; CLUT_MAX_BYTES as usize],
            clut_dirty: true,
            frame_counter: 0,
            clear_next_frame: false,
        }
    }

    /// Materialize the CLUT from guest memory immediately.
    pub fn load_clut(&mut self, addr: u32, bytes: u32) {
        let bytes = bytes.min(CLUT_MAX_BYTES);
        if bytes == 0 {
            return;
        }
        match self.memory.read_bytes(addr, bytes) {
            Ok(data) => {
                self.clut[..data.len()].copy_from_slice(&data);
                self.clut_dirty = false;
                tracing::trace!("Loaded CLUT: {:#010x}, {} bytes", addr, bytes);
            }
            Err(err) => {
                tracing::warn!("CLUT load from {:#010x} failed: {}", addr, err);
            }
        }
    }

    pub fn clut(&self) -> &[u8] {
        &self.clut
    }

    /// Bind (and if needed, insert) the texture the current state points at.
    pub fn set_texture(&mut self, state: &GpuState, ctx: &GpuStateCtx) {
        let addr = state.texture_address(0);
        if !self.memory.is_valid_address(addr) {
            return;
        }
        // A very rough upper bound; good enough for overlap checks.
        let size_in_ram = ctx.cur_texture_width.max(1) * ctx.cur_texture_height.max(1) * 4;
        let frame = self.frame_counter;
        let entry = self.entries.entry(addr).or_insert(TexCacheEntry {
            addr,
            size_in_ram,
            last_frame: frame,
            invalidated: false,
        });
        if entry.invalidated {
            tracing::trace!("Re-decoding invalidated texture {:#010x}", addr);
        }
        entry.last_frame = frame;
        entry.size_in_ram = entry.size_in_ram.max(size_in_ram);
        entry.invalidated = false;
    }

    /// Invalidate cache entries overlapping a guest range.
    pub fn invalidate(&mut self, addr: u32, size: u32, kind: InvalidationKind) {
        let end = addr.saturating_add(size);
        let mut hit = 0usize;
        self.entries.retain(|_, entry| {
            let overlaps = entry.addr < end && addr < entry.addr.saturating_add(entry.size_in_ram);
            if !overlaps {
                return true;
            }
            hit += 1;
            match kind {
                InvalidationKind::Force | InvalidationKind::Safe => false,
                _ => {
                    entry.invalidated = true;
                    true
                }
            }
        });
        if hit > 0 {
            tracing::trace!(
                "Invalidated {} texture(s) in {:#010x}..+{:#x} ({:?})",
                hit,
                addr,
                size,
                kind
            );
        }
    }

    pub fn invalidate_all(&mut self, kind: InvalidationKind) {
        match kind {
            InvalidationKind::Force | InvalidationKind::Safe | InvalidationKind::All => {
                self.entries.clear()
            }
            InvalidationKind::Hint => {
                for entry in self.entries.values_mut() {
                    entry.invalidated = true;
                }
            }
        }
    }

    /// A new frame has started: honor deferred clears and decimate entries
    /// that have not been touched for a long time.
    pub fn start_frame(&mut self) {
        self.frame_counter += 1;
        if self.clear_next_frame {
            self.clear(true);
            self.clear_next_frame = false;
            return;
        }
        let cutoff = self.frame_counter.saturating_sub(TEXTURE_KILL_AGE);
        self.entries.retain(|_, entry| entry.last_frame >= cutoff);
    }

    /// Drop everything. When `delete_them` is false the backing GPU objects
    /// survive (device-lost path keeps its code caches where possible).
    pub fn clear(&mut self, delete_them: bool) {
        self.entries.clear();
        self.clut_dirty = true;
        tracing::debug!("Texture cache cleared (delete={})", delete_them);
    }

    pub fn clear_next_frame(&mut self) {
        self.clear_next_frame = true;
    }

    pub fn num_loaded_textures(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::*;
    use psp_memory::RAM_BASE;

    fn make_state(texaddr: u32) -> (GpuState, GpuStateCtx) {
        let mut state = GpuState::new();
        state.cmdmem[GE_CMD_TEXADDR0 as usize] =
            ((GE_CMD_TEXADDR0 as u32) << 24) | (texaddr & 0xFF_FFFF);
        state.cmdmem[GE_CMD_TEXBUFWIDTH0 as usize] =
            ((GE_CMD_TEXBUFWIDTH0 as u32) << 24) | ((texaddr >> 8) & 0xFF_0000);
        let mut ctx = GpuStateCtx::new();
        ctx.cur_texture_width = 64;
        ctx.cur_texture_height = 64;
        (state, ctx)
    }

    #[test]
    fn test_set_texture_inserts_entry() {
        let memory = MemoryManager::new();
        let mut cache = TextureCache::new(Arc::clone(&memory));
        let (state, ctx) = make_state(RAM_BASE + 0x1000);
        cache.set_texture(&state, &ctx);
        assert_eq!(cache.num_loaded_textures(), 1);
    }

    #[test]
    fn test_invalidate_force_removes_overlap() {
        let memory = MemoryManager::new();
        let mut cache = TextureCache::new(Arc::clone(&memory));
        let (state, ctx) = make_state(RAM_BASE + 0x1000);
        cache.set_texture(&state, &ctx);

        cache.invalidate(RAM_BASE + 0x2000, 0x100, InvalidationKind::Force);
        assert_eq!(cache.num_loaded_textures(), 1);
        cache.invalidate(RAM_BASE + 0x1000, 0x100, InvalidationKind::Force);
        assert_eq!(cache.num_loaded_textures(), 0);
    }

    #[test]
    fn test_load_clut_reads_guest_memory() {
        let memory = MemoryManager::new();
        memory.write_bytes(RAM_BASE, &[0xAA; 64]).unwrap();
        let mut cache = TextureCache::new(Arc::clone(&memory));
        cache.load_clut(RAM_BASE, 64);
        assert_eq!(&cache.clut()[..4], &[0xAA; 4]);
    }

    #[test]
    fn test_clear_next_frame_deferred() {
        let memory = MemoryManager::new();
        let mut cache = TextureCache::new(Arc::clone(&memory));
        let (state, ctx) = make_state(RAM_BASE + 0x1000);
        cache.set_texture(&state, &ctx);
        cache.clear_next_frame();
        assert_eq!(cache.num_loaded_textures(), 1);
        cache.start_frame();
        assert_eq!(cache.num_loaded_textures(), 0);
    }
}
