use crate::data::ColorSource;
use crate::density::VoxelResolution;
use crate::renderer::RenderMode;
use crate::settings::{DatasetSource, SettingChange, Settings};
use egui::Ui;
use std::path::PathBuf;

/// Read-only figures about the loaded scene shown in the panel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneStats {
    pub tracts: usize,
    pub points: usize,
    pub segments: usize,
    pub has_radii: bool,
    pub has_attributes: bool,
    pub scalar_field: bool,
    /// Density voxel counts, if a volume is built.
    pub density_res: Option<[u32; 3]>,
    pub frame_ms: f32,
}

/// Left side panel exposing every viewer option.
#[derive(Debug, Default)]
pub struct SettingsPanel {
    dataset_path: String,
}

impl SettingsPanel {
    pub fn new(settings: &Settings) -> Self {
        let dataset_path = match &settings.dataset {
            DatasetSource::Path(p) => p.display().to_string(),
            DatasetSource::Test => String::new(),
        };
        Self { dataset_path }
    }

    /// Draws the panel and returns the edits made this frame.
    pub fn show(&mut self, ctx: &egui::Context, settings: &Settings, stats: &SceneStats) -> Vec<SettingChange> {
        let mut changes = Vec::new();

        egui::SidePanel::left("settings_panel")
            .default_width(260.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.heading("Dataset");
                    self.dataset_section(ui, &mut changes);
                    ui.separator();

                    ui.heading("Rendering");
                    rendering_section(ui, settings, stats, &mut changes);
                    ui.separator();

                    ui.heading("Ambient Occlusion");
                    ao_section(ui, settings, &mut changes);
                    ui.separator();

                    ui.heading("Statistics");
                    stats_section(ui, stats);
                });
            });

        changes
    }

    fn dataset_section(&mut self, ui: &mut Ui, changes: &mut Vec<SettingChange>) {
        ui.horizontal(|ui| {
            ui.label("Path");
            ui.text_edit_singleline(&mut self.dataset_path);
        });
        ui.horizontal(|ui| {
            let path = self.dataset_path.trim();
            if ui.add_enabled(!path.is_empty(), egui::Button::new("Load")).clicked() {
                changes.push(SettingChange::Dataset(DatasetSource::Path(PathBuf::from(path))));
            }
            if ui.button("Test dataset").clicked() {
                changes.push(SettingChange::Dataset(DatasetSource::Test));
            }
        });
    }
}

fn rendering_section(ui: &mut Ui, settings: &Settings, stats: &SceneStats, changes: &mut Vec<SettingChange>) {
    let mut mode = settings.render_mode;
    egui::ComboBox::from_label("Mode")
        .selected_text(mode.label())
        .show_ui(ui, |ui| {
            for m in RenderMode::ALL {
                ui.add_enabled_ui(m.is_available(), |ui| {
                    ui.selectable_value(&mut mode, m, m.label());
                });
            }
        });
    if mode != settings.render_mode {
        changes.push(SettingChange::RenderMode(mode));
    }

    let mut source = settings.color_source;
    egui::ComboBox::from_label("Color")
        .selected_text(source.label())
        .show_ui(ui, |ui| {
            for s in ColorSource::ALL {
                ui.add_enabled_ui(!s.needs_scalar_field() || stats.scalar_field, |ui| {
                    ui.selectable_value(&mut source, s, s.label());
                });
            }
        });
    if source != settings.color_source {
        changes.push(SettingChange::ColorSource(source));
    }

    let mut res = settings.voxel_resolution;
    egui::ComboBox::from_label("Voxel resolution")
        .selected_text(res.value().to_string())
        .show_ui(ui, |ui| {
            for r in VoxelResolution::ALL {
                ui.selectable_value(&mut res, r, r.value().to_string());
            }
        });
    if res != settings.voxel_resolution {
        changes.push(SettingChange::VoxelResolution(res));
    }

    let mut radius = settings.radius;
    let radius_slider = ui.add_enabled(
        !stats.has_radii,
        egui::Slider::new(&mut radius, 0.001..=0.1)
            .text("Radius")
            .logarithmic(true),
    );
    if radius_slider.changed() {
        changes.push(SettingChange::Radius(radius));
    }

    let mut radius_scale = settings.radius_scale;
    if ui
        .add(egui::Slider::new(&mut radius_scale, 0.1..=5.0).text("Radius scale"))
        .changed()
    {
        changes.push(SettingChange::RadiusScale(radius_scale));
    }

    let mut alpha_scale = settings.alpha_scale;
    if ui
        .add(egui::Slider::new(&mut alpha_scale, 0.0..=1.0).text("Alpha scale"))
        .changed()
    {
        changes.push(SettingChange::AlphaScale(alpha_scale));
    }

    let mut volume_opacity = settings.volume_opacity;
    if ui
        .add_enabled(
            settings.render_mode == RenderMode::Volume,
            egui::Slider::new(&mut volume_opacity, 0.0..=4.0).text("Volume opacity"),
        )
        .changed()
    {
        changes.push(SettingChange::VolumeOpacity(volume_opacity));
    }

    let mut disable_sorting = settings.disable_sorting;
    if ui.checkbox(&mut disable_sorting, "Disable sorting").changed() {
        changes.push(SettingChange::DisableSorting(disable_sorting));
    }
    let mut disable_clipping = settings.disable_clipping;
    if ui.checkbox(&mut disable_clipping, "Disable joint clipping").changed() {
        changes.push(SettingChange::DisableClipping(disable_clipping));
    }

    let mut rgb = [settings.background[0], settings.background[1], settings.background[2]];
    ui.horizontal(|ui| {
        ui.label("Background");
        if ui.color_edit_button_rgb(&mut rgb).changed() {
            changes.push(SettingChange::Background([rgb[0], rgb[1], rgb[2], 1.0]));
        }
    });
}

fn ao_section(ui: &mut Ui, settings: &Settings, changes: &mut Vec<SettingChange>) {
    let ao = settings.ao;

    let mut enabled = ao.enabled;
    if ui.checkbox(&mut enabled, "Enabled (O)").changed() {
        changes.push(SettingChange::AoEnabled(enabled));
    }

    ui.add_enabled_ui(ao.enabled, |ui| {
        let mut offset = ao.offset;
        if ui
            .add(egui::Slider::new(&mut offset, 0.0..=0.05).text("Offset"))
            .changed()
        {
            changes.push(SettingChange::AoOffset(offset));
        }
        let mut distance = ao.distance;
        if ui
            .add(egui::Slider::new(&mut distance, 0.01..=1.0).text("Distance"))
            .changed()
        {
            changes.push(SettingChange::AoDistance(distance));
        }
        let mut strength = ao.strength;
        if ui
            .add(egui::Slider::new(&mut strength, 0.0..=2.0).text("Strength"))
            .changed()
        {
            changes.push(SettingChange::AoStrength(strength));
        }
    });
}

fn stats_section(ui: &mut Ui, stats: &SceneStats) {
    egui::Grid::new("scene_stats").num_columns(2).show(ui, |ui| {
        ui.label("Tracts");
        ui.label(stats.tracts.to_string());
        ui.end_row();

        ui.label("Points");
        ui.label(stats.points.to_string());
        ui.end_row();

        ui.label("Segments");
        ui.label(stats.segments.to_string());
        ui.end_row();

        ui.label("Radii / attributes");
        ui.label(format!("{} / {}", yes_no(stats.has_radii), yes_no(stats.has_attributes)));
        ui.end_row();

        ui.label("Scalar field");
        ui.label(yes_no(stats.scalar_field));
        ui.end_row();

        ui.label("Density voxels");
        ui.label(match stats.density_res {
            Some([x, y, z]) => format!("{x} × {y} × {z}"),
            None => "none".to_owned(),
        });
        ui.end_row();

        ui.label("Frame");
        ui.label(format!("{:.2} ms", stats.frame_ms));
        ui.end_row();
    });
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
