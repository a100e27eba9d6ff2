//! Runtime configuration of the viewer and the work each change schedules.

use crate::config::Config;
use crate::data::dataset::{TEST_DATASET_RADIUS, TRK_DATASET_RADIUS};
use crate::data::{Aabb, ColorSource, TractDataset};
use crate::density::{DensityInput, VoxelResolution};
use crate::renderer::RenderMode;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSource {
    /// The generated helix test dataset.
    Test,
    /// A `.trk` file or a directory of them.
    Path(PathBuf),
}

impl DatasetSource {
    /// Global radius a freshly loaded dataset of this kind starts with.
    pub fn default_radius(&self) -> f32 {
        match self {
            DatasetSource::Test => TEST_DATASET_RADIUS,
            DatasetSource::Path(_) => TRK_DATASET_RADIUS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AoSettings {
    pub enabled: bool,
    /// Distance along the normal before the first cone sample.
    pub offset: f32,
    /// Length of each occlusion cone.
    pub distance: f32,
    pub strength: f32,
}

impl Default for AoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            offset: 0.004,
            distance: 0.3,
            strength: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub dataset: DatasetSource,
    pub render_mode: RenderMode,
    pub color_source: ColorSource,
    pub voxel_resolution: VoxelResolution,
    /// Fixed radius from the command line; replaces the per-dataset default.
    pub radius_override: Option<f32>,
    pub radius: f32,
    pub radius_scale: f32,
    pub alpha_scale: f32,
    pub ao: AoSettings,
    pub disable_sorting: bool,
    pub disable_clipping: bool,
    /// Linear RGBA.
    pub background: [f32; 4],
    pub volume_opacity: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dataset: DatasetSource::Test,
            render_mode: RenderMode::default(),
            color_source: ColorSource::default(),
            voxel_resolution: VoxelResolution::default(),
            radius_override: None,
            radius: TEST_DATASET_RADIUS,
            radius_scale: 1.0,
            alpha_scale: 1.0,
            ao: AoSettings::default(),
            disable_sorting: false,
            disable_clipping: false,
            background: [1.0, 1.0, 1.0, 1.0],
            volume_opacity: 1.0,
        }
    }
}

impl From<&Config> for Settings {
    fn from(c: &Config) -> Self {
        let dataset = c
            .dataset
            .clone()
            .map_or(DatasetSource::Test, DatasetSource::Path);
        let radius = c.radius.unwrap_or_else(|| dataset.default_radius());
        Self {
            dataset,
            render_mode: c.render_mode,
            color_source: c.color_source,
            voxel_resolution: c.voxel_resolution,
            radius_override: c.radius,
            radius,
            alpha_scale: c.alpha_scale,
            ao: AoSettings {
                enabled: c.ao,
                offset: c.ao_offset,
                distance: c.ao_distance,
                strength: c.ao_strength,
            },
            disable_sorting: c.no_sort,
            disable_clipping: c.no_clip,
            ..Self::default()
        }
    }
}

/// One user edit, from the side panel or a key binding.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingChange {
    Dataset(DatasetSource),
    RenderMode(RenderMode),
    ColorSource(ColorSource),
    VoxelResolution(VoxelResolution),
    Radius(f32),
    RadiusScale(f32),
    AlphaScale(f32),
    AoEnabled(bool),
    AoOffset(f32),
    AoDistance(f32),
    AoStrength(f32),
    DisableSorting(bool),
    DisableClipping(bool),
    Background([f32; 4]),
    VolumeOpacity(f32),
}

/// Recomputations pending before the next frame. Anything not covered here only
/// touches the per-frame uniforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    /// Reload, normalize and prepare the dataset. A successful load rebuilds
    /// everything else as well.
    pub dataset: bool,
    /// Re-upload the tube colour buffer.
    pub colors: bool,
    /// Re-voxelize the density volume.
    pub density: bool,
    /// Recreate the off-screen render targets.
    pub targets: bool,
}

impl DirtyFlags {
    pub const ALL: Self = Self {
        dataset: true,
        colors: true,
        density: true,
        targets: true,
    };

    #[inline]
    pub fn any(&self) -> bool {
        self.dataset || self.colors || self.density || self.targets
    }

    pub fn merge(&mut self, other: DirtyFlags) {
        self.dataset |= other.dataset;
        self.colors |= other.colors;
        self.density |= other.density;
        self.targets |= other.targets;
    }

    /// What is still pending once a dataset load has run. A failed load keeps the
    /// previous scene, so edits made in the same frame still apply to it.
    pub fn after_load(self, loaded: bool) -> DirtyFlags {
        if loaded {
            DirtyFlags::default()
        } else {
            DirtyFlags {
                dataset: false,
                ..self
            }
        }
    }
}

impl Settings {
    /// Applies `change` and reports what it invalidates. Setting a value to what it
    /// already is schedules nothing.
    pub fn apply(&mut self, change: SettingChange) -> DirtyFlags {
        let mut dirty = DirtyFlags::default();
        match change {
            SettingChange::Dataset(src) => {
                if self.dataset != src {
                    self.dataset = src;
                    dirty.dataset = true;
                }
            }
            SettingChange::RenderMode(mode) => {
                if self.render_mode != mode {
                    self.render_mode = mode;
                    // opacity weighting of the density depends on the mode
                    dirty.density = true;
                    dirty.targets = true;
                }
            }
            SettingChange::ColorSource(src) => {
                if self.color_source != src {
                    self.color_source = src;
                    dirty.colors = true;
                }
            }
            SettingChange::VoxelResolution(res) => {
                if self.voxel_resolution != res {
                    self.voxel_resolution = res;
                    dirty.density = true;
                }
            }
            SettingChange::Radius(r) => dirty.density = replace(&mut self.radius, r),
            SettingChange::RadiusScale(s) => dirty.density = replace(&mut self.radius_scale, s),
            SettingChange::AlphaScale(a) => {
                // only transparent modes weight density by opacity
                let changed = replace(&mut self.alpha_scale, a);
                dirty.density = changed && self.render_mode.is_transparent();
            }
            SettingChange::AoEnabled(on) => self.ao.enabled = on,
            SettingChange::AoOffset(v) => self.ao.offset = v,
            SettingChange::AoDistance(v) => self.ao.distance = v,
            SettingChange::AoStrength(v) => self.ao.strength = v,
            SettingChange::DisableSorting(v) => self.disable_sorting = v,
            SettingChange::DisableClipping(v) => self.disable_clipping = v,
            SettingChange::Background(c) => self.background = c,
            SettingChange::VolumeOpacity(v) => self.volume_opacity = v,
        }
        dirty
    }

    /// Global radius a dataset from `source` is normalized with.
    pub fn dataset_radius(&self, source: &DatasetSource) -> f32 {
        self.radius_override
            .unwrap_or_else(|| source.default_radius())
    }

    /// Commits the radius of a dataset that loaded successfully.
    pub fn set_dataset_radius(&mut self, radius: f32) {
        self.radius = radius;
        self.radius_scale = 1.0;
    }

    /// Density voxelization input for `dataset`, or `None` in volume mode, which
    /// never samples the density.
    pub fn density_input<'a>(&self, dataset: &'a TractDataset, bbox: Aabb) -> Option<DensityInput<'a>> {
        if self.render_mode == RenderMode::Volume {
            return None;
        }
        Some(DensityInput {
            positions: &dataset.positions,
            tracts: &dataset.tracts,
            radii: &dataset.radii,
            opacities: &dataset.attributes,
            radius: self.radius,
            radius_scale: self.radius_scale,
            alpha_scale: self.alpha_scale,
            opacity_influence: self.opacity_influence(),
            bbox,
            resolution: self.voxel_resolution,
        })
    }

    /// Weight of tube opacity in the density volume.
    pub fn opacity_influence(&self) -> f32 {
        if self.render_mode == RenderMode::Deferred {
            0.0
        } else {
            1.0
        }
    }
}

fn replace(slot: &mut f32, value: f32) -> bool {
    let changed = *slot != value;
    *slot = value;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_and_mode_rebuild_density() {
        let mut s = Settings::default();
        let d = s.apply(SettingChange::VoxelResolution(VoxelResolution::R64));
        assert!(d.density && !d.colors && !d.dataset);
        assert_eq!(s.voxel_resolution, VoxelResolution::R64);

        let d = s.apply(SettingChange::RenderMode(RenderMode::TransparentNaive));
        assert!(d.density && d.targets);
        assert_eq!(s.opacity_influence(), 1.0);
    }

    #[test]
    fn color_source_only_touches_colors() {
        let mut s = Settings::default();
        let d = s.apply(SettingChange::ColorSource(ColorSource::Boys));
        assert_eq!(
            d,
            DirtyFlags {
                colors: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn ao_and_unchanged_values_schedule_nothing() {
        let mut s = Settings::default();
        assert!(!s.apply(SettingChange::AoEnabled(true)).any());
        assert!(s.ao.enabled);
        assert!(!s.apply(SettingChange::AoStrength(0.5)).any());
        assert!(!s.apply(SettingChange::ColorSource(ColorSource::Midpoint)).any());
        assert!(!s.apply(SettingChange::RadiusScale(1.0)).any());
    }

    #[test]
    fn alpha_scale_matters_only_when_transparent() {
        let mut s = Settings::default();
        assert!(!s.apply(SettingChange::AlphaScale(0.5)).density);
        s.apply(SettingChange::RenderMode(RenderMode::TransparentNaive));
        assert!(s.apply(SettingChange::AlphaScale(0.25)).density);
    }

    #[test]
    fn dataset_change_schedules_a_reload() {
        let mut s = Settings::default();
        let d = s.apply(SettingChange::Dataset(DatasetSource::Path("a.trk".into())));
        assert_eq!(
            d,
            DirtyFlags {
                dataset: true,
                ..Default::default()
            }
        );

        // the radius is only committed once the load succeeds
        s.radius_scale = 3.0;
        let r = s.dataset_radius(&s.dataset.clone());
        assert_eq!(r, TRK_DATASET_RADIUS);
        assert_eq!(s.radius, TEST_DATASET_RADIUS);
        s.set_dataset_radius(r);
        assert_eq!(s.radius, TRK_DATASET_RADIUS);
        assert_eq!(s.radius_scale, 1.0);

        s.radius_override = Some(0.03);
        assert_eq!(s.dataset_radius(&DatasetSource::Test), 0.03);

        let mut merged = DirtyFlags::default();
        merged.merge(DirtyFlags {
            colors: true,
            ..Default::default()
        });
        assert!(merged.colors && !merged.density);
    }

    #[test]
    fn failed_load_keeps_same_frame_edits() {
        let mut pending = DirtyFlags::default();
        pending.merge(Settings::default().apply(SettingChange::Dataset(DatasetSource::Path("missing.trk".into()))));
        pending.merge(DirtyFlags {
            colors: true,
            density: true,
            ..Default::default()
        });

        let kept = pending.after_load(false);
        assert!(!kept.dataset);
        assert!(kept.colors && kept.density && !kept.targets);
        assert!(!pending.after_load(true).any());
    }

    #[test]
    fn volume_mode_drops_the_density_and_rebuilds_it_on_return() {
        let mut dataset = TractDataset::test_dataset();
        let bbox = dataset.normalize(TEST_DATASET_RADIUS).unwrap();
        let mut s = Settings::default();
        assert_eq!(s.density_input(&dataset, bbox).unwrap().opacity_influence, 0.0);

        let d = s.apply(SettingChange::RenderMode(RenderMode::Volume));
        assert!(d.density);
        assert!(s.density_input(&dataset, bbox).is_none());

        let d = s.apply(SettingChange::RenderMode(RenderMode::Deferred));
        assert!(d.density && d.targets);
        let input = s.density_input(&dataset, bbox).unwrap();
        assert_eq!(input.opacity_influence, 0.0);
        assert_eq!(input.positions.len(), dataset.positions.len());
        assert_eq!(input.resolution, s.voxel_resolution);

        s.apply(SettingChange::RenderMode(RenderMode::TransparentNaive));
        s.apply(SettingChange::AlphaScale(0.5));
        let input = s.density_input(&dataset, bbox).unwrap();
        assert_eq!(input.opacity_influence, 1.0);
        assert_eq!(input.alpha_scale, 0.5);
    }
}
