//! Raw tract data: flat point arrays plus the ranges that cut them into polylines.

use crate::data::types::Aabb;
use anyhow::{bail, Result};
use glam::{Mat4, Vec3, Vec4};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;
use tractio::TrkFile;

pub use tractio::TractRange;

/// Margin added around the radius-expanded bounding box.
pub const BBOX_MARGIN: f32 = 0.01;

/// Global tube radius used for the generated test dataset.
pub const TEST_DATASET_RADIUS: f32 = 0.02;

/// Global tube radius used for `.trk` datasets.
pub const TRK_DATASET_RADIUS: f32 = 0.015;

/// Polylines stored as one flat position array.
///
/// `radii` and `attributes` are either empty or exactly as long as `positions`.
#[derive(Debug, Clone, Default)]
pub struct TractDataset {
    pub positions: Vec<Vec3>,
    pub tracts: Vec<TractRange>,
    pub radii: Vec<f32>,
    pub attributes: Vec<f32>,
}

impl TractDataset {
    /// Validates tract ranges; mis-sized optional arrays are dropped with a warning.
    pub fn new(
        positions: Vec<Vec3>,
        tracts: Vec<TractRange>,
        mut radii: Vec<f32>,
        mut attributes: Vec<f32>,
    ) -> Result<Self> {
        for (i, t) in tracts.iter().enumerate() {
            let end = t.offset as usize + t.size as usize;
            if end > positions.len() {
                bail!(
                    "tract {} covers [{}, {}) but only {} points exist",
                    i,
                    t.offset,
                    end,
                    positions.len()
                );
            }
        }

        if !radii.is_empty() && radii.len() != positions.len() {
            log::warn!(
                "Ignoring {} radii for {} points; using the global radius.",
                radii.len(),
                positions.len()
            );
            radii.clear();
        }

        if !attributes.is_empty() && attributes.len() != positions.len() {
            log::warn!(
                "Ignoring {} attributes for {} points; attribute colouring disabled.",
                attributes.len(),
                positions.len()
            );
            attributes.clear();
        }

        Ok(Self {
            positions,
            tracts,
            radii,
            attributes,
        })
    }

    /// Two small tracts: one straight segment with growing radius and a random walk of five points.
    pub fn test_dataset() -> Self {
        let mut rng = StdRng::seed_from_u64(42);

        let mut positions = vec![Vec3::new(-0.5, 0.6, 0.0), Vec3::new(0.5, 0.6, -0.5)];
        let mut radii = vec![0.05, 0.1];
        let mut tracts = vec![TractRange { offset: 0, size: 2 }];

        let mut p = Vec3::ZERO;
        for _ in 0..5 {
            positions.push(p);
            radii.push(0.05);

            p.x += 0.5;
            p.y += 0.3 * rng.gen_range(-1.0f32..1.0);
            p.z += 0.3 * rng.gen_range(-1.0f32..1.0);
        }
        tracts.push(TractRange { offset: 2, size: 5 });

        Self {
            positions,
            tracts,
            radii,
            attributes: Vec::new(),
        }
    }

    /// Converts a TrackVis file into render space.
    ///
    /// The file's voxel-to-RAS matrix is followed by an axis swap (y <-> z), an x mirror and a
    /// 0.1 down-scale. The first per-point scalar, if any, becomes the attribute array,
    /// normalised to [0, 1].
    pub fn from_trk(trk: &TrkFile) -> Result<Self> {
        let vox_to_ras = Mat4::from_cols_array_2d(&trk.header.vox_to_ras_or_identity()).transpose();
        let to_world = trk_flip_matrix() * vox_to_ras;

        let positions = trk
            .points
            .iter()
            .map(|p| to_world.transform_point3(Vec3::from(*p)))
            .collect();

        let attributes = trk
            .scalar_channel(0)
            .map(|values| normalize_unit(&values))
            .unwrap_or_default();

        Self::new(positions, trk.tracts.clone(), Vec::new(), attributes)
    }

    /// Reads and converts a `.trk` file.
    pub fn load_trk(path: &Path) -> Result<Self> {
        let trk = tractio::trk::read_file(path)?;
        log::debug!(
            "{}: {} tracts, {} points, {} scalars/point, dim {:?}",
            path.display(),
            trk.tracts.len(),
            trk.points.len(),
            trk.n_scalars(),
            trk.header.dim
        );
        Self::from_trk(&trk)
    }

    /// Concatenates datasets; optional arrays survive only if every part carries them.
    pub fn merge(parts: Vec<TractDataset>) -> Self {
        let keep_radii = !parts.is_empty() && parts.iter().all(|d| !d.radii.is_empty());
        let keep_attr = !parts.is_empty() && parts.iter().all(|d| !d.attributes.is_empty());

        let mut out = TractDataset::default();
        for part in parts {
            let base = out.positions.len() as u32;
            out.tracts.extend(part.tracts.iter().map(|t| TractRange {
                offset: t.offset + base,
                size: t.size,
            }));
            out.positions.extend(part.positions);
            if keep_radii {
                out.radii.extend(part.radii);
            }
            if keep_attr {
                out.attributes.extend(part.attributes);
            }
        }
        out
    }

    #[inline]
    pub fn has_radii(&self) -> bool {
        !self.radii.is_empty()
    }

    #[inline]
    pub fn has_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Number of segments the preparer will emit (degenerate tracts excluded).
    pub fn segment_count(&self) -> usize {
        self.tracts
            .iter()
            .map(|t| (t.size as usize).saturating_sub(1))
            .sum()
    }

    /// Bounding box of every point expanded by its radius (or `global_radius`), plus a margin.
    pub fn bounding_box(&self, global_radius: f32) -> Aabb {
        let mut bbox = Aabb::EMPTY;
        for (i, p) in self.positions.iter().enumerate() {
            let r = self.radii.get(i).copied().unwrap_or(global_radius);
            bbox.add_point(*p - Vec3::splat(r));
            bbox.add_point(*p + Vec3::splat(r));
        }
        bbox.min -= Vec3::splat(BBOX_MARGIN);
        bbox.max += Vec3::splat(BBOX_MARGIN);
        bbox
    }

    /// Moves the dataset into the positive octant and returns its new bounding box.
    ///
    /// Tube joints are flagged through the sign of x, so every coordinate must stay positive.
    pub fn normalize(&mut self, global_radius: f32) -> Result<Aabb> {
        if self.positions.is_empty() {
            bail!("dataset has no points");
        }

        let bbox = self.bounding_box(global_radius);
        let offset = -bbox.min;
        for p in self.positions.iter_mut() {
            *p += offset;
        }

        Ok(bbox.translated(offset))
    }
}

/// Maps TrackVis RAS millimetres to render space: x mirrored, y and z swapped, scaled by 0.1.
pub fn trk_flip_matrix() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(-0.1, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 0.1, 0.0),
        Vec4::new(0.0, 0.1, 0.0, 0.0),
        Vec4::W,
    )
}

fn normalize_unit(values: &[f32]) -> Vec<f32> {
    let (lo, hi) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if !(range > 0.0) {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - lo) / range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractio::TrkHeader;

    #[test]
    fn test_dataset_layout() {
        let d = TractDataset::test_dataset();
        assert_eq!(d.positions.len(), 7);
        assert_eq!(d.radii.len(), 7);
        assert_eq!(
            d.tracts,
            vec![TractRange { offset: 0, size: 2 }, TractRange { offset: 2, size: 5 }]
        );
        assert_eq!(d.segment_count(), 5);
        // random walk advances 0.5 in x per step
        assert!((d.positions[6].x - 2.0).abs() < 1e-6);
        assert!(d.positions[3].y.abs() <= 0.3 && d.positions[3].z.abs() <= 0.3);
    }

    #[test]
    fn test_dataset_is_deterministic() {
        let a = TractDataset::test_dataset();
        let b = TractDataset::test_dataset();
        assert_eq!(a.positions, b.positions);
    }

    #[test]
    fn mis_sized_optional_arrays_are_dropped() {
        let d = TractDataset::new(
            vec![Vec3::ZERO, Vec3::X],
            vec![TractRange { offset: 0, size: 2 }],
            vec![0.1],
            vec![0.5, 0.5],
        )
        .unwrap();
        assert!(!d.has_radii());
        assert!(d.has_attributes());
    }

    #[test]
    fn out_of_range_tract_is_an_error() {
        let r = TractDataset::new(
            vec![Vec3::ZERO],
            vec![TractRange { offset: 0, size: 2 }],
            Vec::new(),
            Vec::new(),
        );
        assert!(r.is_err());
    }

    #[test]
    fn bounding_box_adds_radius_and_margin() {
        let d = TractDataset::new(
            vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 2.0, 3.0)],
            vec![TractRange { offset: 0, size: 2 }],
            vec![0.5, 0.25],
            Vec::new(),
        )
        .unwrap();
        let b = d.bounding_box(0.02);
        assert!((b.min - Vec3::new(0.49, 1.49, 2.49)).abs().max_element() < 1e-6);
        assert!((b.max - Vec3::new(4.26, 2.51, 3.51)).abs().max_element() < 1e-6);
    }

    #[test]
    fn normalize_moves_into_positive_octant() {
        let mut d = TractDataset::test_dataset();
        let before = d.bounding_box(TEST_DATASET_RADIUS);
        let bbox = d.normalize(TEST_DATASET_RADIUS).unwrap();

        assert_eq!(bbox.min, Vec3::ZERO);
        assert!((bbox.extent() - before.extent()).abs().max_element() < 1e-5);
        assert!(d.positions.iter().all(|p| p.min_element() > 0.0));
    }

    #[test]
    fn trk_conversion_swaps_and_scales() {
        let trk = TrkFile {
            header: TrkHeader::default(),
            points: vec![[10.0, 20.0, 30.0], [0.0, 0.0, 0.0]],
            tracts: vec![TractRange { offset: 0, size: 2 }],
            scalars: Vec::new(),
            properties: Vec::new(),
        };
        let d = TractDataset::from_trk(&trk).unwrap();
        assert!((d.positions[0] - Vec3::new(-1.0, 3.0, 2.0)).length() < 1e-5);
        assert!(!d.has_attributes());
    }

    #[test]
    fn trk_scalars_become_unit_attributes() {
        let mut header = TrkHeader::default();
        header.scalar_names = vec!["fa".into()];
        let trk = TrkFile {
            header,
            points: vec![[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            tracts: vec![TractRange { offset: 0, size: 3 }],
            scalars: vec![2.0, 4.0, 6.0],
            properties: Vec::new(),
        };
        let d = TractDataset::from_trk(&trk).unwrap();
        assert_eq!(d.attributes, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn merge_rebases_offsets() {
        let a = TractDataset::test_dataset();
        let b = TractDataset::test_dataset();
        let m = TractDataset::merge(vec![a, b]);
        assert_eq!(m.positions.len(), 14);
        assert_eq!(m.tracts[2], TractRange { offset: 7, size: 2 });
        assert_eq!(m.radii.len(), 14);
        assert!(m.attributes.is_empty());
    }
}
