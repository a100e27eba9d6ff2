//! Piecewise-linear colour maps and direction-based tract colouring.

use glam::{Vec3, Vec4};

/// Evenly spaced colour stops sampled with linear interpolation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearInterpolator {
    pub stops: Vec<Vec4>,
}

impl LinearInterpolator {
    pub fn new(stops: Vec<Vec4>) -> Self {
        Self { stops }
    }

    fn from_rgba(stops: &[[f32; 4]]) -> Self {
        Self::new(stops.iter().map(|s| Vec4::from(*s)).collect())
    }

    /// Colour at `alpha`, clamped to [0, 1]. No stops yields transparent black.
    pub fn interpolate(&self, alpha: f32) -> Vec4 {
        match self.stops.len() {
            0 => Vec4::ZERO,
            1 => self.stops[0],
            count => {
                let alpha = alpha.clamp(0.0, 1.0);
                let fidx = alpha * (count - 1) as f32;
                let idx = fidx as usize;
                if idx >= count - 1 {
                    return self.stops[count - 1];
                }
                let t = (fidx - idx as f32).clamp(0.0, 1.0);
                self.stops[idx].lerp(self.stops[idx + 1], t)
            }
        }
    }

    /// Samples `width` texels for a 1D lookup texture (RGBA8).
    pub fn to_rgba8(&self, width: usize) -> Vec<[u8; 4]> {
        let last = width.saturating_sub(1).max(1) as f32;
        (0..width)
            .map(|i| {
                let c = self.interpolate(i as f32 / last).clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
                [
                    c.x.round() as u8,
                    c.y.round() as u8,
                    c.z.round() as u8,
                    c.w.round() as u8,
                ]
            })
            .collect()
    }
}

/// Per-point attribute map: green (transparent) to blue to red (opaque).
pub fn attribute() -> LinearInterpolator {
    LinearInterpolator::from_rgba(&[
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.5],
        [1.0, 0.0, 0.0, 1.0],
    ])
}

pub fn coolwarm() -> LinearInterpolator {
    LinearInterpolator::from_rgba(&[
        [0.3, 0.3, 0.8, 1.0],
        [0.5, 0.5, 0.9, 1.0],
        [0.6, 0.7, 1.0, 1.0],
        [0.8, 0.8, 0.9, 1.0],
        [0.9, 0.8, 0.8, 1.0],
        [0.9, 0.7, 0.5, 1.0],
        [0.9, 0.4, 0.3, 1.0],
        [0.7, 0.0, 0.2, 1.0],
    ])
}

pub fn extended_kindlmann() -> LinearInterpolator {
    LinearInterpolator::from_rgba(&[
        [0.0, 0.0, 0.0, 1.0],
        [0.2, 0.0, 0.5, 1.0],
        [0.0, 0.3, 0.2, 1.0],
        [0.2, 0.5, 0.0, 1.0],
        [0.9, 0.4, 0.0, 1.0],
        [1.0, 0.5, 0.8, 1.0],
        [0.9, 0.8, 1.0, 1.0],
        [1.0, 1.0, 1.0, 1.0],
    ])
}

pub fn extended_blackbody() -> LinearInterpolator {
    LinearInterpolator::from_rgba(&[
        [0.0, 0.0, 0.0, 1.0],
        [0.2, 0.0, 0.3, 1.0],
        [0.4, 0.1, 0.4, 1.0],
        [0.6, 0.2, 0.4, 1.0],
        [0.8, 0.3, 0.3, 1.0],
        [0.9, 0.5, 0.1, 1.0],
        [0.9, 0.8, 0.1, 1.0],
        [1.0, 1.0, 0.6, 1.0],
    ])
}

pub fn blackbody() -> LinearInterpolator {
    LinearInterpolator::from_rgba(&[
        [0.0, 0.0, 0.0, 1.0],
        [0.2, 0.1, 0.0, 1.0],
        [0.5, 0.1, 0.1, 1.0],
        [0.7, 0.2, 0.1, 1.0],
        [0.9, 0.4, 0.0, 1.0],
        [0.9, 0.6, 0.0, 1.0],
        [0.9, 0.8, 0.2, 1.0],
        [1.0, 1.0, 1.0, 1.0],
    ])
}

pub fn isorainbow() -> LinearInterpolator {
    LinearInterpolator::from_rgba(&[
        [1.0, 0.0, 0.0, 1.0],
        [1.0, 0.5, 0.0, 1.0],
        [1.0, 1.0, 1.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
        [0.0, 0.0, 1.0, 1.0],
        [0.2, 0.2, 0.4, 1.0],
        [0.5, 0.0, 1.0, 1.0],
    ])
}

/// Transfer function for direct volume rendering (inferno, alpha ramps with value).
pub fn inferno() -> LinearInterpolator {
    LinearInterpolator::from_rgba(&[
        [0.001, 0.000, 0.016, 0.000],
        [0.122, 0.047, 0.282, 0.125],
        [0.333, 0.059, 0.427, 0.250],
        [0.533, 0.133, 0.416, 0.375],
        [0.729, 0.212, 0.333, 0.500],
        [0.890, 0.349, 0.200, 0.625],
        [0.976, 0.584, 0.039, 0.750],
        [0.973, 0.820, 0.235, 0.875],
        [0.988, 1.000, 0.643, 1.000],
    ])
}

/// Absolute direction of `a -> b` as a colour, with render y/z swapped back to r,g,b = x,z,y.
#[inline]
pub fn direction_color(a: Vec3, b: Vec3) -> Vec4 {
    let d = (b - a).normalize_or_zero().abs();
    Vec4::new(d.x, d.z, d.y, 1.0)
}

/// Orientation colouring through the real projective plane (Boy's surface embedding).
///
/// Antipodal directions map to the same colour, so a segment's colour does not depend on
/// which end it was traced from.
pub fn boys_surface_color(a: Vec3, b: Vec3) -> Vec4 {
    let v = (b - a).normalize_or_zero();
    let (x, y, z) = (v.x, v.y, v.z);

    let xx2 = x * x;
    let xx3 = x * x * x;
    let yy2 = y * y;
    let yy3 = y * y * y;
    let zz2 = z * z;
    let zz3 = z * z * z;
    let zz4 = zz2 * zz2;
    let xy = x * y;
    let xz = x * z;
    let yz = y * z;

    let hh1 = 0.5 * (3.0 * zz2 - 1.0) / 1.58;
    let hh2 = 3.0 * xz / 2.745;
    let hh3 = 3.0 * yz / 2.745;
    let hh4 = 1.5 * (xx2 - yy2) / 2.745;
    let hh5 = 6.0 * xy / 5.5;
    let hh6 = (1.0 / 1.176) * 0.125 * (35.0 * zz4 - 30.0 * zz2 + 3.0);
    let hh7 = 2.5 * x * (7.0 * zz3 - 3.0 * z) / 3.737;
    let hh8 = 2.5 * y * (7.0 * zz3 - 3.0 * z) / 3.737;
    let hh9 = ((xx2 - yy2) * 7.5 * (7.0 * zz2 - 1.0)) / 15.85;
    let hh10 = ((2.0 * xy) * (7.5 * (7.0 * zz2 - 1.0))) / 15.85;
    let hh11 = 105.0 * (4.0 * xx3 * z - 3.0 * xz * (1.0 - zz2)) / 59.32;
    let hh12 = 105.0 * (-4.0 * yy3 * z + 3.0 * yz * (1.0 - zz2)) / 59.32;

    // (amplitude, phase in degrees) of the four rotated harmonic pairs
    let rot = |amp: f32, deg: f32| {
        let (s, c) = deg.to_radians().sin_cos();
        (amp * s, amp * c)
    };
    let (ss23, cc23) = rot(2.71, -23.0);
    let (ss45, cc45) = rot(2.12, 227.9);
    let (ss67, cc67) = rot(0.972, 251.0);
    let (ss89, cc89) = rot(0.868, 125.0);

    let big_x = hh2 * cc23 + hh3 * ss23 + hh5 * cc45 + hh4 * ss45 + hh7 * cc67 + hh8 * ss67
        + hh10 * cc89
        + hh9 * ss89;
    let big_y = -hh2 * ss23 + hh3 * cc23 - hh5 * ss45 + hh4 * cc45 - hh7 * ss67 + hh8 * cc67
        - hh10 * ss89
        + hh9 * cc89;
    let big_z = -2.8 * hh1 - 0.5 * hh6 + 0.3 * hh11 - 2.5 * hh12;

    // fit into the unit cube
    let fit = |v: f32, trl: f32, w: f32| 0.9 * ((v - trl) / w).abs() + 0.05;
    Vec4::new(
        fit(big_x, -2.0425, 4.1925),
        fit(big_y, -1.8541, 4.0217),
        fit(big_z, -2.1899, 4.0694),
        1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolator_edge_cases() {
        assert_eq!(LinearInterpolator::default().interpolate(0.3), Vec4::ZERO);

        let one = LinearInterpolator::new(vec![Vec4::ONE]);
        assert_eq!(one.interpolate(-5.0), Vec4::ONE);

        let cmap = attribute();
        assert_eq!(cmap.interpolate(-1.0), Vec4::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(cmap.interpolate(2.0), Vec4::new(1.0, 0.0, 0.0, 1.0));
        let mid = cmap.interpolate(0.25);
        assert!((mid - Vec4::new(0.0, 0.5, 0.5, 0.25)).abs().max_element() < 1e-6);
    }

    #[test]
    fn builtin_stop_counts() {
        for cmap in [coolwarm(), extended_kindlmann(), blackbody(), extended_blackbody()] {
            assert_eq!(cmap.stops.len(), 8);
        }
        assert_eq!(isorainbow().stops.len(), 7);
    }

    #[test]
    fn lookup_texture_endpoints() {
        let texels = inferno().to_rgba8(256);
        assert_eq!(texels.len(), 256);
        assert_eq!(texels[0][3], 0);
        assert_eq!(texels[255], [252, 255, 164, 255]);
    }

    #[test]
    fn direction_color_swaps_y_and_z() {
        let c = direction_color(Vec3::ZERO, Vec3::new(0.0, -3.0, 0.0));
        assert_eq!(c, Vec4::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn boys_color_is_antipodally_symmetric_and_in_range() {
        let dirs = [
            Vec3::new(1.0, 0.2, -0.3),
            Vec3::new(-0.4, 0.9, 0.1),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        for d in dirs {
            let fwd = boys_surface_color(Vec3::ZERO, d);
            let back = boys_surface_color(d, Vec3::ZERO);
            assert!((fwd - back).abs().max_element() < 1e-5);
            assert!(fwd.truncate().min_element() >= 0.05 - 1e-6);
        }
    }
}
