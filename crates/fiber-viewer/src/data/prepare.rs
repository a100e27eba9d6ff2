//! Turns tracts into the flat duplicated-endpoint segment arrays the renderer consumes.

use crate::data::colormap::{self, LinearInterpolator};
use crate::data::dataset::TractDataset;
use crate::data::scalar_field::ScalarField;
use glam::{Vec3, Vec4};
use rayon::prelude::*;

/// Which colour array feeds the tube colour buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum ColorSource {
    Attribute,
    /// One colour per tract, from the direction of its middle segment.
    #[default]
    Midpoint,
    /// Direction colour that follows the tract.
    Segment,
    Coolwarm,
    ExtendedKindlmann,
    Blackbody,
    ExtendedBlackbody,
    Isorainbow,
    Boys,
}

impl ColorSource {
    pub const ALL: [ColorSource; 9] = [
        ColorSource::Attribute,
        ColorSource::Midpoint,
        ColorSource::Segment,
        ColorSource::Coolwarm,
        ColorSource::ExtendedKindlmann,
        ColorSource::Blackbody,
        ColorSource::ExtendedBlackbody,
        ColorSource::Isorainbow,
        ColorSource::Boys,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ColorSource::Attribute => "Attribute",
            ColorSource::Midpoint => "Midpoint",
            ColorSource::Segment => "Segment",
            ColorSource::Coolwarm => "Coolwarm",
            ColorSource::ExtendedKindlmann => "Extended Kindlmann",
            ColorSource::Blackbody => "Blackbody",
            ColorSource::ExtendedBlackbody => "Extended Blackbody",
            ColorSource::Isorainbow => "Isorainbow",
            ColorSource::Boys => "Boy's surface",
        }
    }

    /// True for the sources that sample an external scalar field.
    pub fn needs_scalar_field(self) -> bool {
        matches!(
            self,
            ColorSource::Coolwarm
                | ColorSource::ExtendedKindlmann
                | ColorSource::Blackbody
                | ColorSource::ExtendedBlackbody
                | ColorSource::Isorainbow
        )
    }

    fn colormap(self) -> Option<LinearInterpolator> {
        match self {
            ColorSource::Coolwarm => Some(colormap::coolwarm()),
            ColorSource::ExtendedKindlmann => Some(colormap::extended_kindlmann()),
            ColorSource::Blackbody => Some(colormap::blackbody()),
            ColorSource::ExtendedBlackbody => Some(colormap::extended_blackbody()),
            ColorSource::Isorainbow => Some(colormap::isorainbow()),
            _ => None,
        }
    }
}

/// Segment arrays, two entries per segment.
///
/// Every colour array is either empty or as long as `positions`; so is `radii`.
#[derive(Debug, Clone, Default)]
pub struct PreparedTubes {
    pub positions: Vec<Vec3>,
    /// Same as `positions` with x negated on interior joints.
    pub tube_positions: Vec<Vec3>,
    pub radii: Vec<f32>,

    pub midpoint_colors: Vec<Vec4>,
    pub segment_colors: Vec<Vec4>,
    pub attribute_colors: Vec<Vec4>,
    pub boys_colors: Vec<Vec4>,

    pub coolwarm_colors: Vec<Vec4>,
    pub extended_kindlmann_colors: Vec<Vec4>,
    pub blackbody_colors: Vec<Vec4>,
    pub extended_blackbody_colors: Vec<Vec4>,
    pub isorainbow_colors: Vec<Vec4>,
}

impl PreparedTubes {
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.positions.len() / 2
    }

    pub fn colors(&self, source: ColorSource) -> &[Vec4] {
        match source {
            ColorSource::Attribute => &self.attribute_colors,
            ColorSource::Midpoint => &self.midpoint_colors,
            ColorSource::Segment => &self.segment_colors,
            ColorSource::Coolwarm => &self.coolwarm_colors,
            ColorSource::ExtendedKindlmann => &self.extended_kindlmann_colors,
            ColorSource::Blackbody => &self.blackbody_colors,
            ColorSource::ExtendedBlackbody => &self.extended_blackbody_colors,
            ColorSource::Isorainbow => &self.isorainbow_colors,
            ColorSource::Boys => &self.boys_colors,
        }
    }

    /// Colours for `source`, or the midpoint colours when that array is empty.
    pub fn colors_or_default(&self, source: ColorSource) -> &[Vec4] {
        let c = self.colors(source);
        if c.is_empty() {
            &self.midpoint_colors
        } else {
            c
        }
    }

    fn colors_mut(&mut self, source: ColorSource) -> &mut Vec<Vec4> {
        match source {
            ColorSource::Attribute => &mut self.attribute_colors,
            ColorSource::Midpoint => &mut self.midpoint_colors,
            ColorSource::Segment => &mut self.segment_colors,
            ColorSource::Coolwarm => &mut self.coolwarm_colors,
            ColorSource::ExtendedKindlmann => &mut self.extended_kindlmann_colors,
            ColorSource::Blackbody => &mut self.blackbody_colors,
            ColorSource::ExtendedBlackbody => &mut self.extended_blackbody_colors,
            ColorSource::Isorainbow => &mut self.isorainbow_colors,
            ColorSource::Boys => &mut self.boys_colors,
        }
    }
}

/// Segments of a single tract; concatenated in tract order afterwards.
#[derive(Default)]
struct TractChunk {
    positions: Vec<Vec3>,
    tube_positions: Vec<Vec3>,
    radii: Vec<f32>,
    midpoint: Vec<Vec4>,
    segment: Vec<Vec4>,
    attribute: Vec<Vec4>,
    boys: Vec<Vec4>,
    scalars: Vec<f32>,
}

/// Builds every segment array for `dataset`.
///
/// `field` enables the scalar colour maps; values are sampled at each endpoint through
/// [`ScalarField::sample_at`] with `bbox_max` as the far corner of the normalized dataset.
pub fn prepare(dataset: &TractDataset, field: Option<&ScalarField>, bbox_max: Vec3) -> PreparedTubes {
    let attribute_map = colormap::attribute();

    let chunks: Vec<TractChunk> = dataset
        .tracts
        .par_iter()
        .filter(|t| t.size >= 2)
        .map(|t| prepare_tract(dataset, t.offset as usize, t.size as usize, field, bbox_max, &attribute_map))
        .collect();

    let total: usize = chunks.iter().map(|c| c.positions.len()).sum();
    let mut out = PreparedTubes::default();
    out.positions.reserve(total);
    out.tube_positions.reserve(total);

    let mut scalars = Vec::with_capacity(if field.is_some() { total } else { 0 });
    for c in chunks {
        out.positions.extend(c.positions);
        out.tube_positions.extend(c.tube_positions);
        out.radii.extend(c.radii);
        out.midpoint_colors.extend(c.midpoint);
        out.segment_colors.extend(c.segment);
        out.attribute_colors.extend(c.attribute);
        out.boys_colors.extend(c.boys);
        scalars.extend(c.scalars);
    }

    if field.is_some() {
        for source in ColorSource::ALL {
            if let Some(cmap) = source.colormap() {
                *out.colors_mut(source) = scalars.par_iter().map(|&v| cmap.interpolate(v)).collect();
            }
        }
    }

    log::debug!(
        "Prepared {} segments from {} tracts (radii: {}, attributes: {}, scalar field: {})",
        out.segment_count(),
        dataset.tracts.len(),
        !out.radii.is_empty(),
        !out.attribute_colors.is_empty(),
        field.is_some()
    );
    out
}

fn prepare_tract(
    dataset: &TractDataset,
    o: usize,
    s: usize,
    field: Option<&ScalarField>,
    bbox_max: Vec3,
    attribute_map: &LinearInterpolator,
) -> TractChunk {
    let p = &dataset.positions;
    let n = 2 * (s - 1);
    let last_seg = o + s - 2;

    let mut c = TractChunk {
        positions: Vec::with_capacity(n),
        tube_positions: Vec::with_capacity(n),
        segment: Vec::with_capacity(n),
        boys: Vec::with_capacity(n),
        ..Default::default()
    };

    let mut mid = o + s / 2;
    if s % 2 == 0 {
        mid -= 1;
    }
    let tract_color = colormap::direction_color(p[mid], p[mid + 1]);
    c.midpoint = vec![tract_color; n];

    let mut last_color = colormap::direction_color(p[o], p[o + 1]);

    for j in o..=last_seg {
        let a = p[j];
        let b = p[j + 1];

        c.positions.push(a);
        c.positions.push(b);

        let mut ta = a;
        let mut tb = b;
        if j > o {
            ta.x = -ta.x;
        }
        if j < last_seg {
            tb.x = -tb.x;
        }
        c.tube_positions.push(ta);
        c.tube_positions.push(tb);

        let next_color = if j < last_seg {
            colormap::direction_color(a, p[j + 2])
        } else {
            colormap::direction_color(a, b)
        };
        c.segment.push(last_color);
        c.segment.push(next_color);
        last_color = next_color;

        let boys = colormap::boys_surface_color(a, b);
        c.boys.push(boys);
        c.boys.push(boys);

        if dataset.has_radii() {
            c.radii.push(dataset.radii[j]);
            c.radii.push(dataset.radii[j + 1]);
        }

        if dataset.has_attributes() {
            c.attribute.push(attribute_map.interpolate(dataset.attributes[j]));
            c.attribute.push(attribute_map.interpolate(dataset.attributes[j + 1]));
        }

        if let Some(f) = field {
            c.scalars.push(f.sample_at(a, bbox_max));
            c.scalars.push(f.sample_at(b, bbox_max));
        }
    }

    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::TractRange;

    fn line(n: usize, x0: f32) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::new(x0 + i as f32, 1.0 + 0.5 * i as f32, 2.0)).collect()
    }

    fn dataset(sizes: &[u32]) -> TractDataset {
        let mut positions = Vec::new();
        let mut tracts = Vec::new();
        for &s in sizes {
            tracts.push(TractRange {
                offset: positions.len() as u32,
                size: s,
            });
            positions.extend(line(s as usize, 1.0 + positions.len() as f32));
        }
        TractDataset::new(positions, tracts, Vec::new(), Vec::new()).unwrap()
    }

    #[test]
    fn segment_count_and_degenerate_tracts() {
        let d = dataset(&[2, 5, 3]);
        let t = prepare(&d, None, Vec3::splat(20.0));
        assert_eq!(t.positions.len(), 14);
        assert_eq!(t.tube_positions.len(), 14);

        let d = dataset(&[2, 1, 0, 5, 3]);
        let t = prepare(&d, None, Vec3::splat(20.0));
        assert_eq!(t.positions.len(), 14);
        assert_eq!(t.segment_count(), d.segment_count());
    }

    #[test]
    fn color_arrays_match_positions() {
        let d = dataset(&[2, 5, 3]);
        let field = ScalarField::new([2, 2, 2], vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]).unwrap();
        let t = prepare(&d, Some(&field), Vec3::splat(20.0));

        let n = t.positions.len();
        for source in ColorSource::ALL {
            let c = t.colors(source);
            match source {
                ColorSource::Attribute => assert!(c.is_empty()),
                _ => assert_eq!(c.len(), n, "{:?}", source),
            }
        }
        assert!(t.radii.is_empty());
        assert_eq!(t.colors_or_default(ColorSource::Attribute).len(), n);

        let without = prepare(&d, None, Vec3::splat(20.0));
        assert!(without.colors(ColorSource::Coolwarm).is_empty());
        assert_eq!(without.colors(ColorSource::Boys).len(), n);
    }

    #[test]
    fn radii_and_attributes_follow_endpoints() {
        let positions = line(3, 1.0);
        let d = TractDataset::new(
            positions,
            vec![TractRange { offset: 0, size: 3 }],
            vec![0.1, 0.2, 0.3],
            vec![0.0, 0.5, 1.0],
        )
        .unwrap();
        let t = prepare(&d, None, Vec3::splat(10.0));
        assert_eq!(t.radii, vec![0.1, 0.2, 0.2, 0.3]);
        assert_eq!(t.attribute_colors[0], Vec4::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(t.attribute_colors[3], Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn interior_joints_are_sign_flagged() {
        let d = dataset(&[4]);
        let t = prepare(&d, None, Vec3::splat(20.0));
        let flags: Vec<bool> = t.tube_positions.iter().map(|p| p.x < 0.0).collect();
        assert_eq!(flags, vec![false, true, true, true, true, false]);
        for (tp, p) in t.tube_positions.iter().zip(&t.positions) {
            assert_eq!(tp.x.abs(), p.x);
        }
    }

    #[test]
    fn midpoint_color_is_constant_per_tract() {
        let mut positions = line(3, 1.0);
        positions.extend([Vec3::new(5.0, 5.0, 5.0), Vec3::new(5.0, 5.0, 6.0)]);
        let d = TractDataset::new(
            positions,
            vec![TractRange { offset: 0, size: 3 }, TractRange { offset: 3, size: 2 }],
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        let t = prepare(&d, None, Vec3::splat(10.0));

        assert!(t.midpoint_colors[..4].iter().all(|c| *c == t.midpoint_colors[0]));
        // second tract runs along render z, shown as green
        assert_eq!(t.midpoint_colors[4], Vec4::new(0.0, 1.0, 0.0, 1.0));
        // segment colouring hands the previous direction to the next segment's start
        assert_eq!(t.segment_colors[1], t.segment_colors[2]);
    }
}
