use crate::{
    camera::{Camera, CameraController},
    config::Config,
    data::{prepare, Aabb, PreparedTubes, ScalarField, SceneUniforms, TractDataset},
    density::{AoSampling, DensityVolume},
    renderer::{FrameOptions, RenderMode, Renderer},
    settings::{DatasetSource, DirtyFlags, SettingChange, Settings},
    ui::{SceneStats, SettingsPanel},
};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;
use winit::{
    event::{ElementState, KeyEvent, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

/// Share of the bounding-box diagonal the camera frames on load.
const FOCUS_EXTENT_FACTOR: f32 = 0.6;

/// A normalized dataset and everything derived from it on the host.
pub(crate) struct LoadedScene {
    source: DatasetSource,
    dataset: TractDataset,
    tubes: PreparedTubes,
    bbox: Aabb,
}

pub struct App {
    pub renderer: Renderer,
    pub camera: Camera,
    pub camera_controller: CameraController,
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    pub settings: Settings,
    panel: SettingsPanel,
    scene: Option<LoadedScene>,
    scalar_field: Option<ScalarField>,
    sampling: Option<AoSampling>,
    density_res: Option<[u32; 3]>,
    dirty: DirtyFlags,
    last_frame: Instant,
    frame_ms: f32,
}

impl App {
    pub async fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let renderer = Renderer::new(window.clone()).await?;
        let size = renderer.gfx.size;

        let camera = Camera::new(size.width as f32 / size.height.max(1) as f32);
        let camera_controller = CameraController::new();

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            &*window,
            None,
            None,
        );

        let scalar_field = match &config.scalar_field {
            Some(path) => {
                let field = ScalarField::load(path)
                    .with_context(|| format!("Failed to read scalar volume '{}'", path.display()))?;
                Some(match config.trim_threshold {
                    Some(t) => field.trimmed(t),
                    None => field,
                })
            }
            None => None,
        };

        let settings = Settings::from(config);
        let panel = SettingsPanel::new(&settings);

        Ok(Self {
            renderer,
            camera,
            camera_controller,
            egui_ctx,
            egui_state,
            settings,
            panel,
            scene: None,
            scalar_field,
            sampling: None,
            density_res: None,
            // the first update loads the configured dataset
            dirty: DirtyFlags::ALL,
            last_frame: Instant::now(),
            frame_ms: 0.0,
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.renderer.resize(new_size);
            self.camera
                .set_aspect(new_size.width as f32 / new_size.height as f32);
        }
    }

    /// Applies a setting edit and schedules the work it invalidates.
    pub fn change(&mut self, change: SettingChange) {
        log::debug!("Setting changed: {:?}", change);
        let dirty = self.settings.apply(change);
        self.dirty.merge(dirty);
    }

    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(window, event);
        if response.consumed {
            return true;
        }

        if let Some((x, y)) = self.camera_controller.handle_event(event, &mut self.camera) {
            self.focus_at(x, y);
        }

        match event {
            WindowEvent::Resized(physical_size) => self.resize(*physical_size),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyO),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                self.change(SettingChange::AoEnabled(!self.settings.ao.enabled));
            }
            _ => {}
        }

        false
    }

    /// Re-targets the orbit on the tube surface under a clicked pixel.
    fn focus_at(&mut self, x: f64, y: f64) {
        // only the deferred G-buffer holds positions
        if self.settings.render_mode != RenderMode::Deferred || self.scene.is_none() {
            return;
        }
        let size = self.renderer.gfx.size;
        if x < 0.0 || y < 0.0 || x >= size.width as f64 || y >= size.height as f64 {
            return;
        }

        match self.renderer.pick_position(x as u32, y as u32) {
            Ok(Some(p)) => {
                log::debug!("Focus on {:?}", p);
                self.camera.set_target(p);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Position readback failed: {:#}", e),
        }
    }

    /// Runs the recomputations scheduled since the last frame.
    pub fn update(&mut self) -> Result<()> {
        let mut dirty = std::mem::take(&mut self.dirty);
        if !dirty.any() {
            return Ok(());
        }

        if dirty.dataset {
            let loaded = match self.load_dataset() {
                Ok(()) => true,
                // a failed reload keeps the previous scene
                Err(e) if self.scene.is_some() => {
                    log::error!("Failed to load dataset: {:#}", e);
                    if let Some(scene) = &self.scene {
                        self.settings.dataset = scene.source.clone();
                    }
                    false
                }
                Err(e) => return Err(e),
            };
            dirty = dirty.after_load(loaded);
        }

        if dirty.colors {
            if let Some(scene) = &self.scene {
                self.renderer.resources.rebuild_colors(
                    &self.renderer.gfx.device,
                    &scene.tubes,
                    self.settings.color_source,
                );
            }
        }
        if dirty.density {
            self.rebuild_density()?;
        }
        if dirty.targets {
            self.renderer
                .targets
                .resize(&self.renderer.gfx.device, self.renderer.gfx.size);
        }
        Ok(())
    }

    /// Replaces the scene. Nothing is touched unless the new dataset loads.
    fn load_dataset(&mut self) -> Result<()> {
        let source = self.settings.dataset.clone();
        let radius = self.settings.dataset_radius(&source);
        let scene = load_scene(&source, radius, self.scalar_field.as_ref())?;
        self.settings.set_dataset_radius(radius);

        let bbox = scene.bbox;
        self.camera
            .focus_on(bbox.center(), FOCUS_EXTENT_FACTOR * bbox.extent().length());

        let device = &self.renderer.gfx.device;
        let queue = &self.renderer.gfx.queue;
        let resources = &mut self.renderer.resources;
        resources.rebuild_geometry(device, &scene.tubes, self.settings.color_source);
        resources.rebuild_scalar_volume(device, queue, self.scalar_field.as_ref(), bbox.max);
        self.renderer.targets.resize(device, self.renderer.gfx.size);

        self.scene = Some(scene);
        self.rebuild_density()
    }

    fn rebuild_density(&mut self) -> Result<()> {
        let device = &self.renderer.gfx.device;
        let queue = &self.renderer.gfx.queue;
        let Some(scene) = &self.scene else {
            return Ok(());
        };

        let Some(input) = self.settings.density_input(&scene.dataset, scene.bbox) else {
            self.renderer.resources.clear_density(device, queue);
            self.sampling = None;
            self.density_res = None;
            return Ok(());
        };
        let volume = DensityVolume::build(&input)?;
        self.renderer.resources.rebuild_density(device, queue, &volume);
        self.sampling = Some(volume.sampling);
        self.density_res = Some(volume.grid.res.to_array());
        Ok(())
    }

    fn scene_uniforms(&self) -> SceneUniforms {
        let s = &self.settings;
        let size = self.renderer.gfx.size;
        let (w, h) = (size.width.max(1) as f32, size.height.max(1) as f32);
        let view_proj = self.camera.view_proj();
        let has_radii = self.scene.as_ref().is_some_and(|sc| sc.dataset.has_radii());

        let mut u = SceneUniforms {
            view_proj: view_proj.to_cols_array_2d(),
            view: self.camera.view().to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            eye_pos: self.camera.eye().extend(1.0).to_array(),
            background: s.background,
            viewport: [w, h, 1.0 / w, 1.0 / h],
            radius: s.radius,
            radius_scale: s.radius_scale,
            alpha_scale: s.alpha_scale,
            use_global_radius: u32::from(!has_radii),
            clip_joints: u32::from(!s.disable_clipping),
            ao_enabled: 0,
            apply_gamma: u32::from(!self.renderer.gfx.surface_is_srgb()),
            ..Default::default()
        };

        if let Some(sampling) = &self.sampling {
            let max_lod = self.renderer.resources.density.mip_levels.saturating_sub(1) as f32;
            u.ao_enabled = u32::from(s.ao.enabled);
            u.tex_offset = sampling.tex_offset.extend(0.0).to_array();
            u.tex_scaling = sampling.tex_scaling.extend(0.0).to_array();
            u.tex_coord_scaling = sampling.tex_coord_scaling.extend(0.0).to_array();
            u.sample_dirs = sampling.sample_dirs.map(|d| d.extend(0.0).to_array());
            u.ao_params = [s.ao.offset, s.ao.distance, s.ao.strength, sampling.texel_size];
            u.ao_cone = [sampling.cone_angle_factor, max_lod, 0.0, 0.0];
        }
        u
    }

    fn stats(&self) -> SceneStats {
        let mut stats = SceneStats {
            scalar_field: self.scalar_field.is_some(),
            density_res: self.density_res,
            frame_ms: self.frame_ms,
            ..Default::default()
        };
        if let Some(scene) = &self.scene {
            stats.tracts = scene.dataset.tracts.len();
            stats.points = scene.dataset.positions.len();
            stats.segments = scene.tubes.segment_count();
            stats.has_radii = scene.dataset.has_radii();
            stats.has_attributes = scene.dataset.has_attributes();
        }
        stats
    }

    pub fn render(&mut self, window: &Window) -> Result<(), wgpu::SurfaceError> {
        let now = Instant::now();
        self.frame_ms = now.duration_since(self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;

        let frame = self.renderer.gfx.surface.get_current_texture()?;
        let swap_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let uniforms = self.scene_uniforms();
        let options = FrameOptions {
            mode: self.settings.render_mode,
            sorting: !self.settings.disable_sorting,
            eye: self.camera.eye(),
            background: self.settings.background,
            volume_opacity: self.settings.volume_opacity,
        };
        self.renderer.render(&swap_view, &uniforms, &options);

        let stats = self.stats();
        let egui_input = self.egui_state.take_egui_input(window);
        self.egui_ctx.begin_frame(egui_input);

        let changes = self.panel.show(&self.egui_ctx, &self.settings, &stats);

        let egui_output = self.egui_ctx.end_frame();
        self.egui_state
            .handle_platform_output(window, egui_output.platform_output);
        let shapes = self
            .egui_ctx
            .tessellate(egui_output.shapes, self.egui_ctx.pixels_per_point());

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [
                self.renderer.gfx.config.width,
                self.renderer.gfx.config.height,
            ],
            pixels_per_point: self.egui_ctx.pixels_per_point(),
        };

        let mut encoder = self
            .renderer
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("UI Encoder"),
            });

        for (id, delta) in &egui_output.textures_delta.set {
            self.renderer.egui_renderer.update_texture(
                &self.renderer.gfx.device,
                &self.renderer.gfx.queue,
                *id,
                delta,
            );
        }

        self.renderer.egui_renderer.update_buffers(
            &self.renderer.gfx.device,
            &self.renderer.gfx.queue,
            &mut encoder,
            &shapes,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("EGUI Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &swap_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.renderer
                .egui_renderer
                .render(&mut render_pass, &shapes, &screen_descriptor);
        }

        for id in &egui_output.textures_delta.free {
            self.renderer.egui_renderer.free_texture(id);
        }

        self.renderer
            .gfx
            .queue
            .submit(std::iter::once(encoder.finish()));
        frame.present();

        for change in changes {
            self.change(change);
        }

        Ok(())
    }
}

/// Loads, normalizes and prepares a dataset on the host.
pub(crate) fn load_scene(source: &DatasetSource, radius: f32, field: Option<&ScalarField>) -> Result<LoadedScene> {
    let started = Instant::now();
    let mut dataset = match source {
        DatasetSource::Test => TractDataset::test_dataset(),
        DatasetSource::Path(path) => load_tracts(path)?,
    };
    let bbox = dataset.normalize(radius)?;
    log::info!(
        "Loaded {} tracts, {} points in {:.2?}; bbox {:?} .. {:?}",
        dataset.tracts.len(),
        dataset.positions.len(),
        started.elapsed(),
        bbox.min,
        bbox.max
    );

    let started = Instant::now();
    let tubes = prepare(&dataset, field, bbox.max);
    log::info!("Prepared {} segments in {:.2?}", tubes.segment_count(), started.elapsed());

    Ok(LoadedScene {
        source: source.clone(),
        dataset,
        tubes,
        bbox,
    })
}

/// Reads one `.trk` file, or every `.trk` file below a directory merged into one dataset.
fn load_tracts(path: &Path) -> Result<TractDataset> {
    if !path.is_dir() {
        return TractDataset::load_trk(path)
            .with_context(|| format!("Failed to read tract file '{}'", path.display()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("trk"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!("No .trk files found in '{}'", path.display());
    }

    log::info!("Loading {} tract files...", paths.len());
    let parts: Vec<TractDataset> = paths
        .iter()
        .filter_map(|p| match TractDataset::load_trk(p) {
            Ok(d) => Some(d),
            Err(e) => {
                log::error!("Failed to load {}: {}", p.display(), e);
                None
            }
        })
        .collect();

    if parts.is_empty() {
        bail!("None of the .trk files in '{}' could be read", path.display());
    }
    Ok(TractDataset::merge(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::TEST_DATASET_RADIUS;
    use crate::density::VoxelResolution;

    fn cone_volume(r0: f32, r1: f32, len: f32) -> f32 {
        std::f32::consts::PI * len * (r0 * r0 + r0 * r1 + r1 * r1) / 3.0
    }

    #[test]
    fn test_dataset_flows_through_to_density() {
        let scene = load_scene(&DatasetSource::Test, TEST_DATASET_RADIUS, None).unwrap();
        let d = &scene.dataset;
        assert_eq!(scene.source, DatasetSource::Test);
        assert_eq!(d.positions.len(), 7);
        assert_eq!(d.tracts.len(), 2);
        assert_eq!((d.tracts[0].offset, d.tracts[0].size), (0, 2));
        assert_eq!((d.tracts[1].offset, d.tracts[1].size), (2, 5));
        assert!(scene.bbox.min.abs().max_element() < 1e-5);

        // one segment in the first tract, four in the second, endpoints duplicated
        let tubes = &scene.tubes;
        assert_eq!(tubes.positions.len(), 10);
        assert_eq!(tubes.segment_count(), 5);
        let joints: Vec<bool> = tubes
            .positions
            .iter()
            .zip(&tubes.tube_positions)
            .map(|(p, t)| t.x == -p.x && p.x != 0.0)
            .collect();
        assert_eq!(
            joints,
            [false, false, false, true, true, true, true, true, true, false]
        );

        let mut settings = Settings::default();
        settings.voxel_resolution = VoxelResolution::R32;
        let input = settings.density_input(d, scene.bbox).unwrap();
        let (grid, voxels) = DensityVolume::accumulate(&input).unwrap();
        let mut expected = 0.0;
        for pair in tubes.positions.chunks_exact(2).zip(tubes.radii.chunks_exact(2)) {
            let (p, r) = pair;
            expected += cone_volume(r[0], r[1], (p[1] - p[0]).length());
        }
        expected /= grid.voxel_size.powi(3);
        let sum: f32 = voxels.iter().sum();
        assert!((sum - expected).abs() <= 1e-3 * expected, "{} vs {}", sum, expected);
    }

    #[test]
    fn missing_dataset_fails_without_a_scene() {
        let missing = DatasetSource::Path("/nonexistent/tracts.trk".into());
        assert!(load_scene(&missing, 0.015, None).is_err());

        let empty = std::env::temp_dir().join("fiber_viewer_empty_tract_dir");
        std::fs::create_dir_all(&empty).unwrap();
        let err = load_scene(&DatasetSource::Path(empty), 0.015, None).err().unwrap();
        assert!(err.to_string().contains("No .trk files"));
    }
}
