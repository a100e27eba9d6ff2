//! Scalar volume (e.g. fractional anisotropy) used for colour mapping and volume rendering.
//!
//! Loader space has z pointing up; render space has y up. The field is kept in loader
//! order and converted on demand.

use anyhow::{bail, Result};
use glam::Vec3;
use std::path::Path;
use tractio::NiftiVolume;

#[derive(Debug, Clone)]
pub struct ScalarField {
    /// Voxel counts in loader space (x, y, z-up).
    pub dims: [usize; 3],
    /// x fastest.
    pub data: Vec<f32>,
}

impl ScalarField {
    pub fn new(dims: [usize; 3], data: Vec<f32>) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            bail!("scalar field dimensions must be positive, got {:?}", dims);
        }
        if data.len() != dims[0] * dims[1] * dims[2] {
            bail!(
                "scalar field has {} values for dimensions {:?}",
                data.len(),
                dims
            );
        }
        Ok(Self { dims, data })
    }

    pub fn from_nifti(vol: NiftiVolume) -> Result<Self> {
        Self::new(vol.dims, vol.data)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let vol = tractio::nifti::read_file(path)?;
        log::info!(
            "Loaded scalar volume {} ({}x{}x{}, {:?})",
            path.display(),
            vol.dims[0],
            vol.dims[1],
            vol.dims[2],
            vol.datatype
        );
        Self::from_nifti(vol)
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Crops the empty border: keeps the smallest box holding every value above `threshold`.
    /// A field with no such value is returned unchanged.
    pub fn trimmed(&self, threshold: f32) -> Self {
        let [nx, ny, nz] = self.dims;
        let mut lo = [usize::MAX; 3];
        let mut hi = [0usize; 3];

        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    if self.data[self.index(x, y, z)] > threshold {
                        for (axis, c) in [x, y, z].into_iter().enumerate() {
                            lo[axis] = lo[axis].min(c);
                            hi[axis] = hi[axis].max(c);
                        }
                    }
                }
            }
        }

        if lo[0] == usize::MAX {
            return self.clone();
        }

        let dims = [hi[0] - lo[0] + 1, hi[1] - lo[1] + 1, hi[2] - lo[2] + 1];
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                let row = self.index(lo[0], y, z);
                data.extend_from_slice(&self.data[row..row + dims[0]]);
            }
        }

        log::debug!("Trimmed scalar field {:?} -> {:?} (origin {:?})", self.dims, dims, lo);
        Self { dims, data }
    }

    /// Dimensions and data with y and z swapped, ready for a render-space 3D texture.
    pub fn render_space(&self) -> ([usize; 3], Vec<f32>) {
        let [nx, ny, nz] = self.dims;
        let dims = [nx, nz, ny];
        let mut out = Vec::with_capacity(self.data.len());
        // render (x, y = loader z, z = loader y), x fastest
        for rz in 0..ny {
            for ry in 0..nz {
                for x in 0..nx {
                    out.push(self.data[self.index(x, rz, ry)]);
                }
            }
        }
        (dims, out)
    }

    /// Value at a render-space position inside `[0, bbox_max]`.
    ///
    /// Render x maps to loader x, render z to loader y and render y to loader z; the
    /// voxel index is clamped to the field.
    pub fn sample_at(&self, pos: Vec3, bbox_max: Vec3) -> f32 {
        let [nx, ny, nz] = self.dims;
        let cell = |v: f32, max: f32, n: usize| -> usize {
            let scaled = if max > 0.0 { v * (n as f32 / max) } else { 0.0 };
            (scaled.floor().max(0.0) as usize).min(n - 1)
        };
        let lx = cell(pos.x, bbox_max.x, nx);
        let ly = cell(pos.z, bbox_max.z, ny);
        let lz = cell(pos.y, bbox_max.y, nz);
        self.data[self.index(lx, ly, lz)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dims: [usize; 3]) -> ScalarField {
        let n = dims[0] * dims[1] * dims[2];
        ScalarField::new(dims, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn rejects_mismatched_data() {
        assert!(ScalarField::new([2, 2, 2], vec![0.0; 7]).is_err());
        assert!(ScalarField::new([0, 2, 2], Vec::new()).is_err());
    }

    #[test]
    fn render_space_swaps_y_and_z() {
        let f = ramp([2, 3, 4]);
        let (dims, data) = f.render_space();
        assert_eq!(dims, [2, 4, 3]);
        // render (x=1, y=2, z=1) is loader (x=1, y=1, z=2)
        let r_idx = 1 + 2 * (2 + 4 * 1);
        assert_eq!(data[r_idx], f.data[f.index(1, 1, 2)]);
    }

    #[test]
    fn sample_maps_axes_and_clamps() {
        let f = ramp([4, 4, 2]);
        let max = Vec3::new(4.0, 2.0, 4.0);
        // render (x=1.5, y=1.5, z=2.5) -> loader (1, 2, 1)
        assert_eq!(f.sample_at(Vec3::new(1.5, 1.5, 2.5), max), f.data[f.index(1, 2, 1)]);
        // the far corner clamps to the last voxel
        assert_eq!(f.sample_at(max, max), f.data[f.index(3, 3, 1)]);
        assert_eq!(f.sample_at(Vec3::splat(-1.0), max), f.data[0]);
    }

    #[test]
    fn trimming_crops_to_content() {
        let mut f = ScalarField::new([4, 4, 4], vec![0.0; 64]).unwrap();
        let a = f.index(1, 1, 2);
        let b = f.index(2, 3, 2);
        f.data[a] = 0.5;
        f.data[b] = 0.7;

        let t = f.trimmed(0.1);
        assert_eq!(t.dims, [2, 3, 1]);
        assert_eq!(t.data[t.index(0, 0, 0)], 0.5);
        assert_eq!(t.data[t.index(1, 2, 0)], 0.7);
        assert!((t.max() - 0.7).abs() < 1e-6);

        let empty = ScalarField::new([2, 2, 2], vec![0.0; 8]).unwrap();
        assert_eq!(empty.trimmed(0.1).dims, [2, 2, 2]);
    }
}
