//! Voxelization of tube geometry into an occlusion density field.

pub mod traversal;
pub mod volume;

pub use traversal::{traverse_segment, Interval, VoxelGrid};
pub use volume::{AoSampling, DensityInput, DensityVolume, MipLevel};

/// Voxel count along the longest bounding-box axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoxelResolution {
    R8,
    R16,
    R32,
    R64,
    R128,
    #[default]
    R256,
    R512,
}

impl VoxelResolution {
    pub const ALL: [VoxelResolution; 7] = [
        VoxelResolution::R8,
        VoxelResolution::R16,
        VoxelResolution::R32,
        VoxelResolution::R64,
        VoxelResolution::R128,
        VoxelResolution::R256,
        VoxelResolution::R512,
    ];

    #[inline]
    pub fn value(self) -> u32 {
        match self {
            VoxelResolution::R8 => 8,
            VoxelResolution::R16 => 16,
            VoxelResolution::R32 => 32,
            VoxelResolution::R64 => 64,
            VoxelResolution::R128 => 128,
            VoxelResolution::R256 => 256,
            VoxelResolution::R512 => 512,
        }
    }

    pub fn from_value(v: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.value() == v)
    }
}
