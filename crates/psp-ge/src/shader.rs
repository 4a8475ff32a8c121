//! Shader manager: uniform dirty tracking and program cache bookkeeping
//!
//! The GE core never generates shader code; it only tells this manager
//! which uniform groups changed and when cached programs can no longer be
//! trusted. The draw engine consumes the dirty set at flush time.

use bitflags::bitflags;

bitflags! {
    /// Bundles of shader constants that must be re-uploaded before the
    /// next draw.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyUniforms: u32 {
        const FOGCOLOR = 1 << 0;
        const FOGCOEF = 1 << 1;
        const UVSCALEOFFSET = 1 << 2;
        const AMBIENT = 1 << 3;
        const MATDIFFUSE = 1 << 4;
        const MATEMISSIVE = 1 << 5;
        const MATAMBIENTALPHA = 1 << 6;
        const MATSPECULAR = 1 << 7;
        const LIGHT0 = 1 << 8;
        const LIGHT1 = 1 << 9;
        const LIGHT2 = 1 << 10;
        const LIGHT3 = 1 << 11;
        const WORLDMATRIX = 1 << 12;
        const VIEWMATRIX = 1 << 13;
        const PROJMATRIX = 1 << 14;
        const TEXMATRIX = 1 << 15;
        const BONEMATRIX0 = 1 << 16;
        const BONEMATRIX1 = 1 << 17;
        const BONEMATRIX2 = 1 << 18;
        const BONEMATRIX3 = 1 << 19;
        const BONEMATRIX4 = 1 << 20;
        const BONEMATRIX5 = 1 << 21;
        const BONEMATRIX6 = 1 << 22;
        const BONEMATRIX7 = 1 << 23;
        const COLORMASK = 1 << 24;
        const ALPHACOLORREF = 1 << 25;
        const TEXENV = 1 << 26;
        const STENCILREPLACEVALUE = 1 << 27;
        const ALL = 0x0FFF_FFFF;
    }
}

impl DirtyUniforms {
    /// The group for a numbered light.
    #[inline]
    pub fn light(light: usize) -> Self {
        DirtyUniforms::from_bits_truncate(DirtyUniforms::LIGHT0.bits() << light)
    }

    /// The group for one of the eight bone matrices.
    #[inline]
    pub fn bone(matrix: usize) -> Self {
        DirtyUniforms::from_bits_truncate(DirtyUniforms::BONEMATRIX0.bits() << matrix)
    }
}

/// Tracks which uniform groups need re-upload and which cached programs
/// are stale.
pub struct ShaderManager {
    dirty: DirtyUniforms,
    /// Per-group count of dirty notifications, indexed by bit position.
    dirty_counts: [u32; 28],
    shader_dirty: bool,
    last_shader_valid: bool,
    vertex_shaders: usize,
    fragment_shaders: usize,
    programs: usize,
}

impl ShaderManager {
    pub fn new() -> Self {
        Self {
            dirty: DirtyUniforms::ALL,
            dirty_counts: [0; 28],
            shader_dirty: true,
            last_shader_valid: false,
            vertex_shaders: 0,
            fragment_shaders: 0,
            programs: 0,
        }
    }

    /// Mark uniform groups as needing re-upload before the next draw.
    pub fn dirty_uniform(&mut self, groups: DirtyUniforms) {
        self.dirty |= groups;
        for bit in 0..self.dirty_counts.len() {
            if groups.bits() & (1 << bit) != 0 {
                self.dirty_counts[bit] += 1;
            }
        }
    }

    pub fn is_dirty(&self, groups: DirtyUniforms) -> bool {
        self.dirty.intersects(groups)
    }

    /// How many times a single group was dirtied since construction.
    pub fn dirty_count(&self, group: DirtyUniforms) -> u32 {
        debug_assert_eq!(group.bits().count_ones(), 1);
        self.dirty_counts[group.bits().trailing_zeros() as usize]
    }

    /// Consume and clear the dirty set; called by the draw engine when it
    /// applies state for a flush.
    pub fn take_dirty(&mut self) -> DirtyUniforms {
        std::mem::replace(&mut self.dirty, DirtyUniforms::empty())
    }

    /// The active program must be re-resolved before the next draw.
    pub fn dirty_shader(&mut self) {
        self.shader_dirty = true;
    }

    /// Forget the last bound program without touching the cache.
    pub fn dirty_last_shader(&mut self) {
        self.last_shader_valid = false;
    }

    pub fn is_shader_dirty(&self) -> bool {
        self.shader_dirty
    }

    /// Drop cached programs. When `delete_them` is false the underlying
    /// compiled objects are kept for reuse after a device reset.
    pub fn clear_cache(&mut self, delete_them: bool) {
        if delete_them {
            self.vertex_shaders = 0;
            self.fragment_shaders = 0;
            self.programs = 0;
        }
        self.shader_dirty = true;
        self.last_shader_valid = false;
        self.dirty = DirtyUniforms::ALL;
        tracing::debug!("Shader cache cleared (delete={})", delete_them);
    }

    pub fn num_vertex_shaders(&self) -> usize {
        self.vertex_shaders
    }

    pub fn num_fragment_shaders(&self) -> usize {
        self.fragment_shaders
    }

    pub fn num_programs(&self) -> usize {
        self.programs
    }
}

impl Default for ShaderManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_and_bone_group_selection() {
        assert_eq!(DirtyUniforms::light(0), DirtyUniforms::LIGHT0);
        assert_eq!(DirtyUniforms::light(3), DirtyUniforms::LIGHT3);
        assert_eq!(DirtyUniforms::bone(7), DirtyUniforms::BONEMATRIX7);
    }

    #[test]
    fn test_dirty_counts_per_group() {
        let mut shaders = ShaderManager::new();
        shaders.dirty_uniform(DirtyUniforms::FOGCOLOR);
        shaders.dirty_uniform(DirtyUniforms::FOGCOLOR);
        shaders.dirty_uniform(DirtyUniforms::AMBIENT);
        assert_eq!(shaders.dirty_count(DirtyUniforms::FOGCOLOR), 2);
        assert_eq!(shaders.dirty_count(DirtyUniforms::AMBIENT), 1);
        assert_eq!(shaders.dirty_count(DirtyUniforms::FOGCOEF), 0);
    }

    #[test]
    fn test_take_dirty_clears() {
        let mut shaders = ShaderManager::new();
        shaders.take_dirty();
        shaders.dirty_uniform(DirtyUniforms::WORLDMATRIX);
        assert!(shaders.is_dirty(DirtyUniforms::WORLDMATRIX));
        let taken = shaders.take_dirty();
        assert!(taken.contains(DirtyUniforms::WORLDMATRIX));
        assert!(!shaders.is_dirty(DirtyUniforms::WORLDMATRIX));
    }

    #[test]
    fn test_all_covers_every_group() {
        assert!(DirtyUniforms::ALL.contains(DirtyUniforms::STENCILREPLACEVALUE));
        assert!(DirtyUniforms::ALL.contains(DirtyUniforms::BONEMATRIX7));
        assert_eq!(DirtyUniforms::ALL.bits().count_ones(), 28);
    }
}
