//! Amanatides–Woo traversal of a line segment through a uniform voxel grid.

use glam::{IVec3, UVec3, Vec3};

/// Direction components below this magnitude are treated as parallel to the cell faces.
const DIR_EPSILON: f32 = 1e-8;

/// Placement of a uniform grid of cubic cells in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    pub origin: Vec3,
    /// Side length of one cell.
    pub voxel_size: f32,
    pub res: UVec3,
}

impl VoxelGrid {
    #[inline]
    pub fn cell_of(&self, p: Vec3) -> IVec3 {
        ((p - self.origin) / self.voxel_size).floor().as_ivec3()
    }

    #[inline]
    pub fn contains_cell(&self, c: IVec3) -> bool {
        c.cmpge(IVec3::ZERO).all() && c.cmplt(self.res.as_ivec3()).all()
    }

    /// Flattened index, x fastest.
    #[inline]
    pub fn linear_index(&self, c: IVec3) -> usize {
        let (rx, ry) = (self.res.x as usize, self.res.y as usize);
        c.x as usize + rx * c.y as usize + rx * ry * c.z as usize
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.res.x as usize * self.res.y as usize * self.res.z as usize
    }
}

/// Part of a segment lying inside one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub cell: usize,
    pub length: f32,
}

/// Walks the cells crossed by `a -> b`, in order, with the length spent in each.
///
/// The lengths add up to `|b - a|` while the segment stays inside the grid. If it leaves
/// the grid the walk stops at the exit crossing. A start point outside the grid yields no
/// intervals.
pub fn traverse_segment(a: Vec3, b: Vec3, grid: &VoxelGrid) -> Vec<Interval> {
    let mut cell = grid.cell_of(a);
    if !grid.contains_cell(cell) {
        return Vec::new();
    }

    let delta = b - a;
    let total = delta.length();
    let end = grid.cell_of(b);
    if cell == end || total <= DIR_EPSILON {
        return vec![Interval {
            cell: grid.linear_index(cell),
            length: total,
        }];
    }

    let dir = delta / total;
    let rel = a - grid.origin;
    let mut step = IVec3::ZERO;
    let mut t_max = Vec3::splat(f32::INFINITY);
    let mut t_delta = Vec3::splat(f32::INFINITY);

    for i in 0..3 {
        if dir[i] > DIR_EPSILON {
            step[i] = 1;
            t_max[i] = ((cell[i] + 1) as f32 * grid.voxel_size - rel[i]) / dir[i];
            t_delta[i] = grid.voxel_size / dir[i];
        } else if dir[i] < -DIR_EPSILON {
            step[i] = -1;
            t_max[i] = (cell[i] as f32 * grid.voxel_size - rel[i]) / dir[i];
            t_delta[i] = -grid.voxel_size / dir[i];
        }
    }

    // A walk never visits more cells than the grid spans along all three axes.
    let max_steps = (grid.res.x + grid.res.y + grid.res.z) as usize + 3;
    let mut out = Vec::with_capacity(8);
    let mut t_prev = 0.0f32;

    for _ in 0..max_steps {
        let axis = if t_max.x < t_max.y {
            if t_max.x < t_max.z { 0 } else { 2 }
        } else if t_max.y < t_max.z {
            1
        } else {
            2
        };
        let t_next = t_max[axis];

        if cell == end || t_next >= total {
            out.push(Interval {
                cell: grid.linear_index(cell),
                length: (total - t_prev).max(0.0),
            });
            return out;
        }

        out.push(Interval {
            cell: grid.linear_index(cell),
            length: t_next - t_prev,
        });
        t_prev = t_next;
        cell[axis] += step[axis];
        t_max[axis] += t_delta[axis];

        if !grid.contains_cell(cell) {
            return out;
        }
    }

    log::warn!("Grid traversal of {:?} -> {:?} did not terminate", a, b);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn grid(res: UVec3, voxel_size: f32) -> VoxelGrid {
        VoxelGrid {
            origin: Vec3::new(-0.3, 0.2, 1.0),
            voxel_size,
            res,
        }
    }

    fn random_inside(rng: &mut StdRng, g: &VoxelGrid) -> Vec3 {
        let ext = g.res.as_vec3() * g.voxel_size;
        g.origin + Vec3::new(
            rng.gen_range(0.0..1.0) * ext.x,
            rng.gen_range(0.0..1.0) * ext.y,
            rng.gen_range(0.0..1.0) * ext.z,
        ) * 0.999
    }

    fn cell_box_contains(g: &VoxelGrid, index: usize, p: Vec3, tol: f32) -> bool {
        let (rx, ry) = (g.res.x as usize, g.res.y as usize);
        let c = UVec3::new((index % rx) as u32, ((index / rx) % ry) as u32, (index / (rx * ry)) as u32);
        let lo = g.origin + c.as_vec3() * g.voxel_size - Vec3::splat(tol);
        let hi = lo + Vec3::splat(g.voxel_size + 2.0 * tol);
        p.cmpge(lo).all() && p.cmple(hi).all()
    }

    #[test]
    fn lengths_sum_to_segment_length() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let res = UVec3::new(rng.gen_range(1..24), rng.gen_range(1..24), rng.gen_range(1..24));
            let g = grid(res, rng.gen_range(0.01..0.5));
            let a = random_inside(&mut rng, &g);
            let b = random_inside(&mut rng, &g);

            let intervals = traverse_segment(a, b, &g);
            let sum: f32 = intervals.iter().map(|i| i.length).sum();
            let len = (b - a).length();
            assert!((sum - len).abs() <= 1e-4 * len.max(1e-3), "{} vs {}", sum, len);
            assert!(intervals.iter().all(|i| i.length >= 0.0 && i.cell < g.cell_count()));
        }
    }

    #[test]
    fn first_and_last_cells_hold_endpoints() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let g = grid(UVec3::new(16, 9, 12), 0.1);
            let a = random_inside(&mut rng, &g);
            let b = random_inside(&mut rng, &g);

            let intervals = traverse_segment(a, b, &g);
            let first = intervals.first().unwrap();
            let last = intervals.last().unwrap();
            assert_eq!(first.cell, g.linear_index(g.cell_of(a)));
            assert!(cell_box_contains(&g, last.cell, b, 1e-4));
        }
    }

    #[test]
    fn axis_aligned_segment_steps_one_axis() {
        let g = VoxelGrid {
            origin: Vec3::ZERO,
            voxel_size: 1.0,
            res: UVec3::new(4, 2, 2),
        };
        let r = traverse_segment(Vec3::new(0.5, 0.5, 0.5), Vec3::new(3.25, 0.5, 0.5), &g);
        let cells: Vec<usize> = r.iter().map(|i| i.cell).collect();
        assert_eq!(cells, vec![0, 1, 2, 3]);
        let lengths: Vec<f32> = r.iter().map(|i| i.length).collect();
        assert_eq!(lengths, vec![0.5, 1.0, 1.0, 0.25]);
    }

    #[test]
    fn same_cell_and_zero_length() {
        let g = grid(UVec3::splat(4), 0.25);
        let p = g.origin + Vec3::splat(0.3);
        let r = traverse_segment(p, p, &g);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].length, 0.0);

        let q = p + Vec3::new(0.05, -0.02, 0.01);
        let r = traverse_segment(p, q, &g);
        assert_eq!(r.len(), 1);
        assert!((r[0].length - (q - p).length()).abs() < 1e-6);
    }

    #[test]
    fn leaving_the_grid_truncates() {
        let g = VoxelGrid {
            origin: Vec3::ZERO,
            voxel_size: 1.0,
            res: UVec3::new(2, 1, 1),
        };
        let r = traverse_segment(Vec3::new(0.5, 0.5, 0.5), Vec3::new(5.0, 0.5, 0.5), &g);
        assert_eq!(r.len(), 2);
        let sum: f32 = r.iter().map(|i| i.length).sum();
        assert!((sum - 1.5).abs() < 1e-6);

        assert!(traverse_segment(Vec3::splat(-1.0), Vec3::splat(0.5), &g).is_empty());
    }
}
