use crate::data::ColorSource;
use crate::density::VoxelResolution;
use crate::renderer::RenderMode;
use clap::Parser;
use std::path::PathBuf;

/// `fiber_viewer` - Interactive tube renderer for tractography data.
///
/// Renders fiber tracts as shaded tubes with density-volume ambient occlusion,
/// sorted transparency or direct volume rendering of a scalar field.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// A `.trk` file or a directory searched recursively for `.trk` files.
    ///
    /// Without it a generated test dataset is shown.
    #[arg(long, env = "FIBER_DATASET")]
    pub dataset: Option<PathBuf>,

    /// A NIfTI-1 scalar volume (e.g. fractional anisotropy) used by the scalar
    /// colormaps and the volume render mode.
    #[arg(long, env = "FIBER_SCALAR_FIELD")]
    pub scalar_field: Option<PathBuf>,

    /// Crop the scalar volume to the voxels above this value before upload.
    #[arg(long, env = "FIBER_TRIM_THRESHOLD")]
    pub trim_threshold: Option<f32>,

    #[arg(long, value_enum, default_value = "deferred", env = "FIBER_RENDER_MODE")]
    pub render_mode: RenderMode,

    #[arg(long, value_enum, default_value = "midpoint", env = "FIBER_COLOR_SOURCE")]
    pub color_source: ColorSource,

    /// Voxel count along the longest axis of the density volume (8..512, powers of two).
    #[arg(long, default_value = "256", value_parser = parse_voxel_resolution, env = "FIBER_VOXEL_RESOLUTION")]
    pub voxel_resolution: VoxelResolution,

    /// Global tube radius used when the dataset has no per-point radii.
    /// Defaults to a per-dataset value.
    #[arg(long, env = "FIBER_RADIUS")]
    pub radius: Option<f32>,

    #[arg(long, default_value_t = 1.0, env = "FIBER_ALPHA_SCALE")]
    pub alpha_scale: f32,

    /// Start with ambient occlusion enabled (toggle at runtime with `O`).
    #[arg(long, env = "FIBER_AO")]
    pub ao: bool,

    #[arg(long, default_value_t = 0.004, env = "FIBER_AO_OFFSET")]
    pub ao_offset: f32,

    #[arg(long, default_value_t = 0.3, env = "FIBER_AO_DISTANCE")]
    pub ao_distance: f32,

    #[arg(long, default_value_t = 1.0, env = "FIBER_AO_STRENGTH")]
    pub ao_strength: f32,

    /// Keep the previous draw order in transparent mode instead of sorting every frame.
    #[arg(long, env = "FIBER_NO_SORT")]
    pub no_sort: bool,

    /// Draw tube joints without clipping against the neighbouring segment.
    #[arg(long, env = "FIBER_NO_CLIP")]
    pub no_clip: bool,
}

fn parse_voxel_resolution(s: &str) -> Result<VoxelResolution, String> {
    let v: u32 = s.parse().map_err(|e| format!("{e}"))?;
    VoxelResolution::from_value(v).ok_or_else(|| {
        let allowed: Vec<String> = VoxelResolution::ALL.iter().map(|r| r.value().to_string()).collect();
        format!("{v} is not one of {}", allowed.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_viewer_defaults() {
        let c = Config::try_parse_from(["fiber_viewer"]).unwrap();
        assert!(c.dataset.is_none());
        assert_eq!(c.render_mode, RenderMode::Deferred);
        assert_eq!(c.color_source, ColorSource::Midpoint);
        assert_eq!(c.voxel_resolution, VoxelResolution::R256);
        assert!(!c.ao && !c.no_sort && !c.no_clip);
        assert_eq!(c.ao_offset, 0.004);
    }

    #[test]
    fn parses_modes_and_resolution() {
        let c = Config::try_parse_from([
            "fiber_viewer",
            "--render-mode",
            "transparent-naive",
            "--color-source",
            "extended-kindlmann",
            "--voxel-resolution",
            "64",
            "--ao",
        ])
        .unwrap();
        assert_eq!(c.render_mode, RenderMode::TransparentNaive);
        assert_eq!(c.color_source, ColorSource::ExtendedKindlmann);
        assert_eq!(c.voxel_resolution, VoxelResolution::R64);
        assert!(c.ao);
    }

    #[test]
    fn rejects_unsupported_resolution() {
        assert!(Config::try_parse_from(["fiber_viewer", "--voxel-resolution", "100"]).is_err());
    }
}
