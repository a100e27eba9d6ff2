//! Host-side density volume: each voxel holds the fraction of its volume filled by tubes.

use super::traversal::{traverse_segment, VoxelGrid};
use super::VoxelResolution;
use crate::data::{Aabb, TractRange};
use anyhow::{bail, Result};
use glam::{UVec3, Vec3};
use rayon::prelude::*;
use std::f32::consts::PI;
use std::time::Instant;

/// Full opening angle of the occlusion cone, in degrees.
pub const AO_CONE_ANGLE: f32 = 50.0;

/// Everything the voxelizer reads. Slices are indexed by raw point.
#[derive(Debug, Clone, Copy)]
pub struct DensityInput<'a> {
    pub positions: &'a [Vec3],
    pub tracts: &'a [TractRange],
    /// Per-point radii; empty uses `radius` everywhere.
    pub radii: &'a [f32],
    /// Per-point opacity in [0, 1]; empty means fully opaque.
    pub opacities: &'a [f32],
    pub radius: f32,
    pub radius_scale: f32,
    pub alpha_scale: f32,
    /// 0 makes density independent of opacity (opaque rendering), 1 scales it fully.
    pub opacity_influence: f32,
    pub bbox: Aabb,
    pub resolution: VoxelResolution,
}

/// Parameters the shading stage needs to sample the density texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AoSampling {
    /// World-space corner of the voxel box.
    pub tex_offset: Vec3,
    /// 1 / voxel box extent.
    pub tex_scaling: Vec3,
    /// Longest-axis voxel count divided by each axis' count.
    pub tex_coord_scaling: Vec3,
    pub texel_size: f32,
    pub cone_angle_factor: f32,
    /// Unit directions in a frame whose y axis is the surface normal.
    pub sample_dirs: [Vec3; 3],
}

impl AoSampling {
    fn new(grid: &VoxelGrid) -> Self {
        let vres = grid.res.as_vec3();
        let vbox_ext = vres * grid.voxel_size;
        let max_res = vres.max_element();
        let (sample_dirs, cone_angle_factor) = cone_directions(AO_CONE_ANGLE);

        Self {
            tex_offset: grid.origin,
            tex_scaling: Vec3::ONE / vbox_ext,
            tex_coord_scaling: Vec3::splat(max_res) / vres,
            texel_size: 1.0 / max_res,
            cone_angle_factor,
            sample_dirs,
        }
    }
}

/// Three directions spread evenly around the y axis at half of `cone_angle_deg`,
/// plus the factor turning a travelled distance into a cone diameter.
pub fn cone_directions(cone_angle_deg: f32) -> ([Vec3; 3], f32) {
    let alpha2 = (cone_angle_deg / 2.0).to_radians();
    let beta = (90.0 - cone_angle_deg / 2.0).to_radians();

    let a = alpha2.sin();
    let dh = 30f32.to_radians().tan() * a;
    let c = (a * a + dh * dh).sqrt();
    let b = (1.0 - c * c).sqrt();

    (
        [Vec3::new(0.0, b, c), Vec3::new(a, b, -dh), Vec3::new(-a, b, -dh)],
        2.0 * alpha2.sin() / beta.sin(),
    )
}

/// One level of the density mip chain.
#[derive(Debug, Clone)]
pub struct MipLevel {
    pub dims: UVec3,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct DensityVolume {
    pub grid: VoxelGrid,
    /// Clamped densities, x fastest.
    pub data: Vec<f32>,
    pub sampling: AoSampling,
}

impl DensityVolume {
    /// Fits a cubic-voxel grid around `bbox` with `resolution` cells on the longest axis.
    pub fn fit_grid(bbox: &Aabb, resolution: VoxelResolution) -> Result<VoxelGrid> {
        let ext = bbox.extent();
        if !ext.is_finite() || !(ext.max_element() > 0.0) {
            bail!("cannot voxelize a bounding box with extent {:?}", ext);
        }

        let n = resolution.value();
        let max_axis = if ext.x >= ext.y && ext.x >= ext.z {
            0
        } else if ext.y >= ext.z {
            1
        } else {
            2
        };
        let vsize = ext[max_axis] / n as f32;

        let mut res = UVec3::ZERO;
        for i in 0..3 {
            res[i] = ((ext[i] / vsize).ceil() as u32).clamp(1, n);
        }
        res[max_axis] = n;

        let vbox_ext = res.as_vec3() * vsize;
        Ok(VoxelGrid {
            origin: bbox.min - 0.5 * (vbox_ext - ext),
            voxel_size: vsize,
            res,
        })
    }

    /// Unclamped per-voxel density sums.
    pub fn accumulate(input: &DensityInput) -> Result<(VoxelGrid, Vec<f32>)> {
        let grid = Self::fit_grid(&input.bbox, input.resolution)?;
        let vvol = grid.voxel_size.powi(3);
        let mut voxels = vec![0.0f32; grid.cell_count()];

        let has_radii = input.radii.len() == input.positions.len();
        let has_opacity = input.opacities.len() == input.positions.len();

        for t in input.tracts {
            let from = t.offset as usize;
            let to = from + (t.size as usize).saturating_sub(1);

            for j in from..to {
                let p0 = input.positions[j];
                let p1 = input.positions[j + 1];

                let (r0, r1) = if has_radii {
                    (input.radii[j], input.radii[j + 1])
                } else {
                    (input.radius, input.radius)
                };
                let (r0, r1) = (r0 * input.radius_scale, r1 * input.radius_scale);
                let (a0, a1) = if has_opacity {
                    (input.opacities[j], input.opacities[j + 1])
                } else {
                    (1.0, 1.0)
                };

                let total = (p1 - p0).length();
                if !(total > 0.0) {
                    continue;
                }

                let mut accum = 0.0f32;
                for iv in traverse_segment(p0, p1, &grid) {
                    let f0 = accum / total;
                    let f1 = (accum + iv.length) / total;
                    accum += iv.length;

                    let ra = r0 + f0 * (r1 - r0);
                    let rb = r0 + f1 * (r1 - r0);
                    let mid = 0.5 * (f0 + f1);
                    let opacity = (a0 + mid * (a1 - a0)) * input.alpha_scale;

                    let vol = (PI / 3.0) * (ra * ra + ra * rb + rb * rb) * iv.length;
                    let weight = 1.0 - input.opacity_influence * (1.0 - opacity);
                    voxels[iv.cell] += vol / vvol * weight;
                }
            }
        }

        Ok((grid, voxels))
    }

    /// Voxelizes every segment; runs on the calling thread and blocks until done.
    pub fn build(input: &DensityInput) -> Result<Self> {
        let started = Instant::now();
        let (grid, mut data) = Self::accumulate(input)?;
        for v in data.iter_mut() {
            *v = v.clamp(0.0, 1.0);
        }

        log::info!(
            "Density volume {}x{}x{} (voxel {:.4}) built in {:.2?}",
            grid.res.x,
            grid.res.y,
            grid.res.z,
            grid.voxel_size,
            started.elapsed()
        );

        Ok(Self {
            sampling: AoSampling::new(&grid),
            grid,
            data,
        })
    }

    /// Full mip chain, level 0 first; each level averages 2x2x2 blocks of the previous one.
    pub fn mip_chain(&self) -> Vec<MipLevel> {
        let mut levels = vec![MipLevel {
            dims: self.grid.res,
            data: self.data.clone(),
        }];

        loop {
            let Some(prev) = levels.last() else { break };
            if prev.dims.max_element() <= 1 {
                break;
            }
            let next = downsample(prev);
            levels.push(next);
        }
        levels
    }
}

fn downsample(src: &MipLevel) -> MipLevel {
    let s = src.dims.as_ivec3();
    let dims = (src.dims / 2).max(UVec3::ONE);
    let (nx, ny, nz) = (dims.x as usize, dims.y as usize, dims.z as usize);
    let mut data = vec![0.0f32; nx * ny * nz];

    data.par_chunks_mut(nx * ny).enumerate().for_each(|(z, slice)| {
        for y in 0..ny {
            for x in 0..nx {
                let mut sum = 0.0;
                let mut count = 0.0;
                for dz in 0..2 {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let sx = (2 * x + dx) as i32;
                            let sy = (2 * y + dy) as i32;
                            let sz = (2 * z + dz) as i32;
                            if sx < s.x && sy < s.y && sz < s.z {
                                sum += src.data[sx as usize
                                    + s.x as usize * (sy as usize + s.y as usize * sz as usize)];
                                count += 1.0;
                            }
                        }
                    }
                }
                slice[x + nx * y] = if count > 0.0 { sum / count } else { 0.0 };
            }
        }
    });

    MipLevel { dims, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TractDataset;

    fn single_segment(p0: Vec3, p1: Vec3, r: [f32; 2], opacities: &[f32], influence: f32) -> Vec<f32> {
        let positions = [p0, p1];
        let tracts = [TractRange { offset: 0, size: 2 }];
        let input = DensityInput {
            positions: &positions,
            tracts: &tracts,
            radii: &r,
            opacities,
            radius: 0.0,
            radius_scale: 1.0,
            alpha_scale: 1.0,
            opacity_influence: influence,
            bbox: Aabb::new(Vec3::ZERO, Vec3::ONE),
            resolution: VoxelResolution::R8,
        };
        DensityVolume::build(&input).unwrap().data
    }

    fn cone_volume(r0: f32, r1: f32, len: f32) -> f32 {
        (PI / 3.0) * (r0 * r0 + r0 * r1 + r1 * r1) * len
    }

    #[test]
    fn segment_inside_one_voxel() {
        let p0 = Vec3::new(0.52, 0.52, 0.52);
        let p1 = Vec3::new(0.55, 0.53, 0.54);
        let data = single_segment(p0, p1, [0.01, 0.02], &[], 0.0);

        let vvol = 0.125f32.powi(3);
        let expected = cone_volume(0.01, 0.02, (p1 - p0).length()) / vvol;
        let idx = 4 + 8 * 4 + 64 * 4;
        assert!((data[idx] - expected).abs() < 1e-6);
        assert_eq!(data.iter().filter(|&&v| v > 0.0).count(), 1);

        // a thick tube saturates
        let data = single_segment(p0, p1, [0.2, 0.2], &[], 0.0);
        assert_eq!(data[idx], 1.0);
    }

    #[test]
    fn opacity_only_matters_outside_deferred() {
        let p0 = Vec3::new(0.52, 0.52, 0.52);
        let p1 = Vec3::new(0.55, 0.53, 0.54);
        let full = single_segment(p0, p1, [0.01, 0.01], &[], 1.0);
        let opaque = single_segment(p0, p1, [0.01, 0.01], &[0.5, 0.5], 0.0);
        let half = single_segment(p0, p1, [0.01, 0.01], &[0.5, 0.5], 1.0);

        let idx = 4 + 8 * 4 + 64 * 4;
        assert_eq!(opaque[idx], full[idx]);
        assert!((half[idx] - 0.5 * full[idx]).abs() < 1e-7);
    }

    #[test]
    fn test_dataset_volume_is_conserved() {
        let mut d = TractDataset::test_dataset();
        let bbox = d.normalize(0.02).unwrap();
        let input = DensityInput {
            positions: &d.positions,
            tracts: &d.tracts,
            radii: &d.radii,
            opacities: &[],
            radius: 0.02,
            radius_scale: 1.0,
            alpha_scale: 1.0,
            opacity_influence: 0.0,
            bbox,
            resolution: VoxelResolution::R32,
        };
        let (grid, voxels) = DensityVolume::accumulate(&input).unwrap();

        let mut expected = 0.0;
        for t in &d.tracts {
            let o = t.offset as usize;
            for j in o..o + t.size as usize - 1 {
                let len = (d.positions[j + 1] - d.positions[j]).length();
                expected += cone_volume(d.radii[j], d.radii[j + 1], len);
            }
        }
        expected /= grid.voxel_size.powi(3);

        let sum: f32 = voxels.iter().sum();
        assert!((sum - expected).abs() <= 1e-3 * expected, "{} vs {}", sum, expected);
        assert!(voxels.iter().filter(|&&v| v > 0.0).count() > 5);
    }

    #[test]
    fn grid_uses_cubic_voxels() {
        let bbox = Aabb::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(3.0, 2.0, 1.4));
        let g = DensityVolume::fit_grid(&bbox, VoxelResolution::R8).unwrap();
        assert_eq!(g.res, UVec3::new(8, 4, 2));
        assert!((g.voxel_size - 0.25).abs() < 1e-6);
        // z: 0.4 of extent padded to 0.5, centred
        assert!((g.origin.z - 0.95).abs() < 1e-5);

        let s = AoSampling::new(&g);
        assert_eq!(s.tex_coord_scaling, Vec3::new(1.0, 2.0, 4.0));
        assert_eq!(s.texel_size, 0.125);

        let flat = Aabb::new(Vec3::ONE, Vec3::ONE);
        assert!(DensityVolume::fit_grid(&flat, VoxelResolution::R8).is_err());
    }

    #[test]
    fn cone_directions_are_unit_and_symmetric() {
        let (dirs, factor) = cone_directions(AO_CONE_ANGLE);
        for d in dirs {
            assert!((d.length() - 1.0).abs() < 1e-5);
            assert!((d.y - dirs[0].y).abs() < 1e-6);
        }
        assert!((dirs[1].x + dirs[2].x).abs() < 1e-6);
        let expected = 2.0 * 25f32.to_radians().sin() / 65f32.to_radians().sin();
        assert!((factor - expected).abs() < 1e-6);
    }

    #[test]
    fn mip_chain_halves_until_one() {
        let vol = DensityVolume {
            grid: VoxelGrid {
                origin: Vec3::ZERO,
                voxel_size: 1.0,
                res: UVec3::new(4, 2, 1),
            },
            data: vec![0.5; 8],
            sampling: AoSampling::new(&VoxelGrid {
                origin: Vec3::ZERO,
                voxel_size: 1.0,
                res: UVec3::new(4, 2, 1),
            }),
        };
        let mips = vol.mip_chain();
        let dims: Vec<UVec3> = mips.iter().map(|m| m.dims).collect();
        assert_eq!(dims, vec![UVec3::new(4, 2, 1), UVec3::new(2, 1, 1), UVec3::new(1, 1, 1)]);
        assert!(mips.iter().all(|m| m.data.iter().all(|&v| (v - 0.5).abs() < 1e-6)));
    }
}
