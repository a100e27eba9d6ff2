//! Core data types shared by the host preparation code and the GPU pipelines.

use glam::Vec3;

/// Axis-aligned bounding box in render space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any `add_point` call will overwrite.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn add_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    #[inline]
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Self::new(self.min + offset, self.max + offset)
    }
}

/// One entry of the tube vertex storage buffer.
/// Must match `TubeVertex` in `tube_cast.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq)]
pub struct TubeVertexGpu {
    /// Position with the joint flag in the sign of x; radius in w (0 if none).
    pub pos_radius: [f32; 4],
}

/// Per-frame uniforms shared by the tube, shading and blending passes.
/// Must match `Scene` in `scene.wgsl` (std140-compatible).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct SceneUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    /// xyz = eye position in world space.
    pub eye_pos: [f32; 4],
    /// Linear background colour, a = 1.
    pub background: [f32; 4],
    /// width, height, 1/width, 1/height (physical pixels).
    pub viewport: [f32; 4],

    pub radius: f32,
    pub radius_scale: f32,
    pub alpha_scale: f32,
    pub use_global_radius: u32,

    pub clip_joints: u32,
    pub ao_enabled: u32,
    /// 1 when the swapchain is not sRGB and the shader must encode gamma itself.
    pub apply_gamma: u32,
    pub _pad0: u32,

    /// Density texture mapping (xyz used).
    pub tex_offset: [f32; 4],
    pub tex_scaling: [f32; 4],
    pub tex_coord_scaling: [f32; 4],
    /// Three cone directions in the local frame around the surface normal (xyz used).
    pub sample_dirs: [[f32; 4]; 3],

    /// ao_offset, ao_distance, ao_strength, texel_size
    pub ao_params: [f32; 4],
    /// cone_angle_factor, max density lod, unused, unused
    pub ao_cone: [f32; 4],
}

// Compile-time safety check: buffer size must match the WGSL struct size.
const _: [(); 400] = [(); core::mem::size_of::<SceneUniforms>()];

impl Default for SceneUniforms {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_box_becomes_valid_after_one_point() {
        let mut b = Aabb::EMPTY;
        assert!(!b.is_valid());
        b.add_point(Vec3::new(1.0, -2.0, 3.0));
        assert!(b.is_valid());
        assert_eq!(b.extent(), Vec3::ZERO);
        b.add_point(Vec3::new(-1.0, 2.0, 3.0));
        assert_eq!(b.center(), Vec3::new(0.0, 0.0, 3.0));
    }
}
